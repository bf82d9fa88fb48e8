//! Input-to-action lookup for the active profile.

use std::collections::HashMap;
use std::fmt::Debug;

use crate::error::{InputError, InputResult};
use crate::id::InputId;

/// Maps each bound input to exactly one action.
#[derive(Debug, Clone)]
pub struct BindingMap<A> {
    routes: HashMap<InputId, A>,
}

impl<A> Default for BindingMap<A> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }
}

impl<A: Clone + PartialEq + Debug> BindingMap<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `input` to `action`. Rebinding to the same action is a no-op.
    ///
    /// # Errors
    ///
    /// `Conflict` when the input already triggers a different action.
    pub fn bind(&mut self, input: InputId, action: A) -> InputResult<()> {
        match self.routes.get(&input) {
            Some(existing) if *existing == action => Ok(()),
            Some(existing) => Err(InputError::Conflict {
                input: input.to_string(),
                first: format!("{existing:?}"),
                second: format!("{action:?}"),
            }),
            None => {
                self.routes.insert(input, action);
                Ok(())
            }
        }
    }

    pub fn route(&self, input: &InputId) -> Option<&A> {
        self.routes.get(input)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn inputs(&self) -> impl Iterator<Item = &InputId> {
        self.routes.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[derive(Debug, Clone, PartialEq)]
    enum Action {
        Up(&'static str),
        Down(&'static str),
    }

    #[test]
    fn conflicting_bind_is_rejected() -> TestResult {
        let mut map = BindingMap::new();
        map.bind(InputId::parse("F1")?, Action::Up("dcABS"))?;
        map.bind(InputId::parse("KEY:f1")?, Action::Up("dcABS"))?;
        let err = map.bind(InputId::parse("F1")?, Action::Down("dcABS"));
        assert!(matches!(err, Err(InputError::Conflict { .. })));
        assert_eq!(map.len(), 1);
        Ok(())
    }

    #[test]
    fn routes_by_canonical_id() -> TestResult {
        let mut map = BindingMap::new();
        map.bind(InputId::parse("JOY:wheel:04")?, Action::Down("dcBrakeBias"))?;
        assert_eq!(
            map.route(&InputId::parse("joy:wheel:4")?),
            Some(&Action::Down("dcBrakeBias"))
        );
        assert!(map.route(&InputId::parse("F9")?).is_none());
        Ok(())
    }
}
