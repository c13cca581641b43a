// Step-wise loading progress for multi-step flows.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadingStep {
    pub id: u32,
    pub name: String,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadingState {
    pub steps: Vec<LoadingStep>,
    /// Index of the most recently completed step.
    pub current_step: usize,
    pub percent: f64,
    pub completed: bool,
}

impl LoadingState {
    /// Steps numbered from 1 in the given order.
    pub fn new(names: &[&str]) -> Self {
        let steps = names
            .iter()
            .zip(1u32..)
            .map(|(name, id)| LoadingStep { id, name: (*name).to_owned(), completed: false })
            .collect();
        Self { steps, current_step: 0, percent: 0.0, completed: false }
    }

    /// Mark step `id` and every step before it complete. Unknown ids are
    /// ignored and return false.
    pub fn complete_step(&mut self, id: u32) -> bool {
        let Some(index) = self.steps.iter().position(|step| step.id == id) else {
            return false;
        };
        for step in &mut self.steps[..=index] {
            step.completed = true;
        }
        self.current_step = index;
        self.percent = (index + 1) as f64 / self.steps.len() as f64 * 100.0;
        self.completed = index + 1 == self.steps.len();
        true
    }

    pub fn current_name(&self) -> Option<&str> {
        self.steps.get(self.current_step).map(|step| step.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completing_a_step_completes_its_predecessors() {
        let mut state = LoadingState::new(&["Open", "View", "Tool", "Done"]);
        assert!(state.complete_step(3));

        let done: Vec<bool> = state.steps.iter().map(|s| s.completed).collect();
        assert_eq!(done, vec![true, true, true, false]);
        assert_eq!(state.current_step, 2);
        assert_eq!(state.percent, 75.0);
        assert!(!state.completed);
        assert_eq!(state.current_name(), Some("Tool"));

        assert!(state.complete_step(4));
        assert!(state.completed);
        assert_eq!(state.percent, 100.0);
    }

    #[test]
    fn unknown_steps_are_ignored() {
        let mut state = LoadingState::new(&["Open"]);
        assert!(!state.complete_step(9));
        assert_eq!(state.percent, 0.0);
    }
}
