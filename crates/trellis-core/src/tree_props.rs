use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A value passed implicitly down the tree, looked up by its type.
pub trait TreePropValue: Any + Send + Sync + fmt::Debug {
    fn eq_dyn(&self, other: &dyn TreePropValue) -> bool;
    fn as_any_prop(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync + fmt::Debug + PartialEq> TreePropValue for T {
    fn eq_dyn(&self, other: &dyn TreePropValue) -> bool {
        other
            .as_any_prop()
            .downcast_ref::<T>()
            .is_some_and(|o| self == o)
    }

    fn as_any_prop(&self) -> &dyn Any {
        self
    }
}

/// Immutable map of tree props. Adding a value produces a new container and
/// leaves the original (and every subtree holding it) unchanged.
#[derive(Clone, Default)]
pub struct TreePropContainer(Option<Arc<HashMap<TypeId, Arc<dyn TreePropValue>>>>);

impl TreePropContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: TreePropValue>(&self) -> Option<&T> {
        self.0
            .as_ref()?
            .get(&TypeId::of::<T>())?
            .as_any_prop()
            .downcast_ref::<T>()
    }

    pub fn with<T: TreePropValue>(&self, value: T) -> Self {
        let mut map = self.0.as_deref().cloned().unwrap_or_default();
        map.insert(TypeId::of::<T>(), Arc::new(value));
        Self(Some(Arc::new(map)))
    }

    /// Layers every value of `other` over `self`.
    pub fn merged(&self, other: &TreePropContainer) -> Self {
        match (&self.0, &other.0) {
            (_, None) => self.clone(),
            (None, Some(_)) => other.clone(),
            (Some(a), Some(b)) => {
                let mut map = (**a).clone();
                map.extend(b.iter().map(|(k, v)| (*k, v.clone())));
                Self(Some(Arc::new(map)))
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_ref().is_none_or(|m| m.is_empty())
    }

    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, |m| m.len())
    }
}

impl PartialEq for TreePropContainer {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(a), Some(b)) if Arc::ptr_eq(a, b) => true,
            _ if self.len() != other.len() => false,
            (Some(a), Some(b)) => a
                .iter()
                .all(|(k, v)| b.get(k).is_some_and(|o| v.eq_dyn(&**o))),
            _ => false,
        }
    }
}

impl fmt::Debug for TreePropContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => f.write_str("TreeProps {}"),
            Some(m) => f.debug_set().entries(m.values()).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Theme(&'static str);

    #[derive(Debug, PartialEq)]
    struct Density(u32);

    #[test]
    fn with_does_not_touch_the_original() {
        let root = TreePropContainer::new().with(Theme("light"));
        let child = root.with(Theme("dark")).with(Density(2));

        assert_eq!(root.get::<Theme>(), Some(&Theme("light")));
        assert_eq!(root.get::<Density>(), None);
        assert_eq!(child.get::<Theme>(), Some(&Theme("dark")));
        assert_eq!(child.get::<Density>(), Some(&Density(2)));
    }

    #[test]
    fn equality_is_structural() {
        let a = TreePropContainer::new().with(Theme("light"));
        let b = TreePropContainer::new().with(Theme("light"));
        assert_eq!(a, b);
        assert_ne!(a, a.with(Density(1)));
        assert_ne!(a, TreePropContainer::new().with(Theme("dark")));
        assert_eq!(TreePropContainer::new(), TreePropContainer::new());
    }

    #[test]
    fn merged_prefers_the_overlay() {
        let base = TreePropContainer::new().with(Theme("light")).with(Density(1));
        let overlay = TreePropContainer::new().with(Theme("dark"));
        let m = base.merged(&overlay);
        assert_eq!(m.get::<Theme>(), Some(&Theme("dark")));
        assert_eq!(m.get::<Density>(), Some(&Density(1)));
    }
}
