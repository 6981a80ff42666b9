use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::component::Element;
use crate::error::PipelineError;

const CHILD_SEPARATOR: char = ',';
const MANUAL_KEY_SEPARATOR: char = '$';
const DUPLICATE_SEPARATOR: char = '!';

/// Identifies a component's position in one tree generation. Stable across
/// generations as long as the position (and explicit key) is.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalKey(Arc<str>);

impl GlobalKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &GlobalKey) -> bool {
        let s = self.as_str();
        let a = ancestor.as_str();
        s.len() > a.len()
            && s.starts_with(a)
            && matches!(
                s[a.len()..].chars().next(),
                Some(CHILD_SEPARATOR) | Some(MANUAL_KEY_SEPARATOR)
            )
    }

    fn child(parent: &GlobalKey, separator: char, segment: &str) -> Self {
        let mut s = String::with_capacity(parent.0.len() + segment.len() + 1);
        s.push_str(&parent.0);
        s.push(separator);
        s.push_str(segment);
        Self(s.into())
    }
}

impl fmt::Debug for GlobalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for GlobalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GlobalKey {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl Borrow<str> for GlobalKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Hands out global keys for one pass and rejects collisions.
#[derive(Default)]
pub(crate) struct KeyRegistry {
    seen: HashSet<GlobalKey>,
    unkeyed: HashMap<(GlobalKey, &'static str), usize>,
}

impl KeyRegistry {
    /// Computes the key of `element` placed under `parent`. Unkeyed siblings
    /// of the same type are told apart by their order of appearance.
    pub fn key_for(&mut self, parent: Option<&GlobalKey>, element: &Element) -> GlobalKey {
        let type_name = element.type_name();
        match (parent, element.key()) {
            (None, Some(k)) => GlobalKey::new(k),
            (None, None) => GlobalKey::new(type_name),
            (Some(p), Some(k)) => GlobalKey::child(p, MANUAL_KEY_SEPARATOR, k),
            (Some(p), None) => {
                let n = self.unkeyed.entry((p.clone(), type_name)).or_insert(0);
                let key = if *n == 0 {
                    GlobalKey::child(p, CHILD_SEPARATOR, type_name)
                } else {
                    GlobalKey::child(p, CHILD_SEPARATOR, &format!("{type_name}{DUPLICATE_SEPARATOR}{n}"))
                };
                *n += 1;
                key
            }
        }
    }

    pub fn claim(&mut self, key: &GlobalKey) -> Result<(), PipelineError> {
        if self.seen.insert(key.clone()) {
            Ok(())
        } else {
            Err(PipelineError::DuplicateGlobalKey { key: key.clone() })
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, Rendered};
    use crate::error::ComponentError;
    use crate::scope::RenderScope;

    struct Leaf;

    impl Component for Leaf {
        fn type_name(&self) -> &'static str {
            "Leaf"
        }

        fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
            Ok(Rendered::Empty)
        }
    }

    #[test]
    fn unkeyed_siblings_get_positional_suffixes() {
        let mut keys = KeyRegistry::default();
        let root = GlobalKey::from("Root");
        let a = keys.key_for(Some(&root), &Element::new(Leaf));
        let b = keys.key_for(Some(&root), &Element::new(Leaf));
        assert_eq!(a.as_str(), "Root,Leaf");
        assert_eq!(b.as_str(), "Root,Leaf!1");
        assert!(keys.claim(&a).is_ok());
        assert!(keys.claim(&b).is_ok());
    }

    #[test]
    fn explicit_keys_collide() {
        let mut keys = KeyRegistry::default();
        let root = GlobalKey::from("Root");
        let a = keys.key_for(Some(&root), &Element::new(Leaf).with_key("x"));
        let b = keys.key_for(Some(&root), &Element::new(Leaf).with_key("x"));
        assert_eq!(a, b);
        keys.claim(&a).unwrap();
        let err = keys.claim(&b).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateGlobalKey { .. }));
    }

    #[test]
    fn descendant_check_respects_separators() {
        let parent = GlobalKey::from("Root,Row");
        assert!(GlobalKey::from("Root,Row,Text").is_descendant_of(&parent));
        assert!(GlobalKey::from("Root,Row$a").is_descendant_of(&parent));
        assert!(!GlobalKey::from("Root,Rows").is_descendant_of(&parent));
        assert!(!parent.is_descendant_of(&parent));
    }
}
