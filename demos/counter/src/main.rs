use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, bail};
use trellis_core::prelude::*;
use trellis_devtools::{TraceRecorder, dump_layout};
use trellis_ui::*;

struct App;

impl Component for App {
    fn render(&self, cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
        let count = cx.use_state(|| 0i32);
        let inc = count.updater();
        let dec = count.updater();

        Ok(Rendered::Delegate(
            Column(Modifier::new().padding(24.0).gap(8.0))
                .child((
                    Text(format!("Count: {}", count.get())).size(20.0),
                    Row(Modifier::new().gap(4.0)).child((
                        Button("Increment", move |_: &Click| {
                            inc.update(|c| c + 1, UpdateMode::Async)
                        }),
                        Button("Decrement", move |_: &Click| {
                            dec.update(|c| c - 1, UpdateMode::Async)
                        }),
                    )),
                ))
                .into(),
        ))
    }

    fn is_pure(&self) -> bool {
        false
    }
}

fn buttons(layout: &LayoutState) -> Vec<EventHandler> {
    layout
        .outputs()
        .iter()
        .filter_map(|o| o.unit.as_ref())
        .filter_map(|u| u.content_as::<ButtonContent>())
        .map(|b| b.on_click.clone())
        .collect()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let trace = Arc::new(TraceRecorder::default());
    let tree = RenderTree::builder(TreeConfig::default().background(true))
        .logger(trace.clone())
        .build();

    let (commits, committed) = mpsc::channel();
    tree.add_commit_listener(move |layout| {
        let _ = commits.send(layout.version());
    });

    tree.set_root(Element::new(App));
    tree.set_size_specs(SizeSpec::Exactly(320.0), SizeSpec::AtMost(480.0));
    let first = tree.render_sync()?;
    let layout = first.layout().context("first render produced no layout")?;
    println!("{}", dump_layout(layout));

    while committed.try_recv().is_ok() {}

    let handlers = buttons(layout);
    let [increment, _decrement] = handlers.as_slice() else {
        bail!("expected two buttons");
    };
    for _ in 0..3 {
        if !tree.dispatch(increment, &Click::default()) {
            bail!("increment handler is not bound");
        }
        committed.recv_timeout(Duration::from_secs(2))?;
    }

    tree.set_size_specs(SizeSpec::Exactly(200.0), SizeSpec::AtMost(480.0));
    let (done, resized) = mpsc::channel();
    tree.render_async(move |outcome| {
        let _ = done.send(outcome);
    })?;
    resized.recv_timeout(Duration::from_secs(2))??;

    let layout = tree.committed_layout().context("nothing committed")?;
    println!("{}", dump_layout(&layout));
    print!("{}", trace.summary());
    log::info!("final version {}", layout.version());
    Ok(())
}
