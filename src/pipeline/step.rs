use super::context::{RunContext, RunOptions};
use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

/// Returns a reason when the step should be skipped for this run
pub type SkipPredicate = fn(&RunOptions) -> Option<&'static str>;

/// Static description of one pipeline step
#[derive(Debug, Clone)]
pub struct PipelineStep {
    pub id: String,
    pub display_name: String,
    /// Ids of steps that must complete first
    pub depends_on: Vec<String>,
    /// A required step that fails halts the run unless `continue_on_error`
    pub required: bool,
    /// Treat failure as completion for dependency purposes
    pub continue_on_error: bool,
    pub skip_when: Option<SkipPredicate>,
}

impl PipelineStep {
    /// A required step with no dependencies
    pub fn new(id: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            depends_on: Vec::new(),
            required: true,
            continue_on_error: false,
            skip_when: None,
        }
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn skip_when(mut self, predicate: SkipPredicate) -> Self {
        self.skip_when = Some(predicate);
        self
    }

    pub fn dependencies_met(&self, completed: &HashSet<String>) -> bool {
        self.depends_on.iter().all(|d| completed.contains(d))
    }

    pub fn skip_reason(&self, options: &RunOptions) -> Option<&'static str> {
        self.skip_when.and_then(|predicate| predicate(options))
    }
}

/// How a stage finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Failed(String),
}

impl From<anyhow::Result<()>> for StepOutcome {
    fn from(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => StepOutcome::Succeeded,
            Err(e) => StepOutcome::Failed(format!("{:#}", e)),
        }
    }
}

/// A unit of work the orchestrator can run
#[async_trait]
pub trait Stage: Send + Sync {
    /// Why the stage cannot run right now (missing input, missing
    /// credentials), or `None` when it can.
    fn unavailable_reason(&self, _ctx: &RunContext) -> Option<String> {
        None
    }

    async fn run(&self, ctx: &mut RunContext) -> StepOutcome;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("step '{0}' is registered twice")]
    DuplicateStep(String),
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },
    #[error("step '{step}' depends on '{dependency}', which is declared after it")]
    ForwardDependency { step: String, dependency: String },
}

/// Ordered set of steps and the stages that implement them
#[derive(Default)]
pub struct StepRegistry {
    entries: Vec<(PipelineStep, Box<dyn Stage>)>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the full step list in declaration order.
    /// Unlike [`StepRegistry::register`], this can tell a dependency on a
    /// step declared later from one on a step that does not exist.
    pub fn build(entries: Vec<(PipelineStep, Box<dyn Stage>)>) -> Result<Self, RegistryError> {
        for (i, (step, _)) in entries.iter().enumerate() {
            for dependency in &step.depends_on {
                let earlier = entries[..i].iter().any(|(s, _)| &s.id == dependency);
                let later = entries[i..].iter().any(|(s, _)| &s.id == dependency);
                if !earlier && later {
                    return Err(RegistryError::ForwardDependency {
                        step: step.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        let mut registry = Self::new();
        for (step, stage) in entries {
            registry.register(step, stage)?;
        }
        Ok(registry)
    }

    /// Append a step. Dependencies must name steps registered earlier; a
    /// step depending on itself is a forward edge.
    pub fn register(
        &mut self,
        step: PipelineStep,
        stage: Box<dyn Stage>,
    ) -> Result<(), RegistryError> {
        if self.entries.iter().any(|(s, _)| s.id == step.id) {
            return Err(RegistryError::DuplicateStep(step.id));
        }
        for dependency in &step.depends_on {
            if self.entries.iter().any(|(s, _)| &s.id == dependency) {
                continue;
            }
            let error = if *dependency == step.id {
                RegistryError::ForwardDependency {
                    step: step.id.clone(),
                    dependency: dependency.clone(),
                }
            } else {
                RegistryError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dependency.clone(),
                }
            };
            return Err(error);
        }
        self.entries.push((step, stage));
        Ok(())
    }

    pub fn steps(&self) -> impl Iterator<Item = &PipelineStep> {
        self.entries.iter().map(|(s, _)| s)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&PipelineStep, &dyn Stage)> {
        self.entries.iter().map(|(s, stage)| (s, stage.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Steps not yet run whose dependencies are all completed, in
    /// declaration order
    pub fn executable(
        &self,
        completed: &HashSet<String>,
        already_run: &HashSet<String>,
    ) -> Vec<&PipelineStep> {
        self.steps()
            .filter(|s| !already_run.contains(&s.id) && s.dependencies_met(completed))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Stage for Noop {
        async fn run(&self, _ctx: &mut RunContext) -> StepOutcome {
            StepOutcome::Succeeded
        }
    }

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn registry() -> StepRegistry {
        let mut registry = StepRegistry::new();
        registry.register(PipelineStep::new("a", "A"), Box::new(Noop)).unwrap();
        registry.register(PipelineStep::new("b", "B"), Box::new(Noop)).unwrap();
        registry
            .register(PipelineStep::new("c", "C").depends_on(&["a", "b"]), Box::new(Noop))
            .unwrap();
        registry
            .register(PipelineStep::new("d", "D").depends_on(&["c"]), Box::new(Noop))
            .unwrap();
        registry
    }

    fn ids(steps: Vec<&PipelineStep>) -> Vec<&str> {
        steps.into_iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn test_executable_roots() {
        let registry = registry();
        assert_eq!(ids(registry.executable(&set(&[]), &set(&[]))), vec!["a", "b"]);
    }

    #[test]
    fn test_executable_requires_all_dependencies() {
        let registry = registry();
        assert_eq!(ids(registry.executable(&set(&["a"]), &set(&["a"]))), vec!["b"]);
        assert_eq!(
            ids(registry.executable(&set(&["a", "b"]), &set(&["a", "b"]))),
            vec!["c"]
        );
        assert_eq!(
            ids(registry.executable(&set(&["a", "b", "c"]), &set(&["a", "b", "c"]))),
            vec!["d"]
        );
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = registry();
        assert_eq!(
            registry.register(PipelineStep::new("a", "A again"), Box::new(Noop)),
            Err(RegistryError::DuplicateStep("a".into()))
        );
    }

    #[test]
    fn test_register_rejects_unknown_and_self_dependencies() {
        let mut registry = registry();
        assert!(matches!(
            registry.register(PipelineStep::new("e", "E").depends_on(&["zzz"]), Box::new(Noop)),
            Err(RegistryError::UnknownDependency { .. })
        ));
        assert!(matches!(
            registry.register(PipelineStep::new("f", "F").depends_on(&["f"]), Box::new(Noop)),
            Err(RegistryError::ForwardDependency { .. })
        ));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_build_tells_forward_from_unknown() {
        let forward: Vec<(PipelineStep, Box<dyn Stage>)> = vec![
            (PipelineStep::new("a", "A").depends_on(&["b"]), Box::new(Noop)),
            (PipelineStep::new("b", "B"), Box::new(Noop)),
        ];
        assert_eq!(
            StepRegistry::build(forward).err(),
            Some(RegistryError::ForwardDependency {
                step: "a".into(),
                dependency: "b".into()
            })
        );

        let unknown: Vec<(PipelineStep, Box<dyn Stage>)> = vec![
            (PipelineStep::new("a", "A"), Box::new(Noop)),
            (PipelineStep::new("b", "B").depends_on(&["zzz"]), Box::new(Noop)),
        ];
        assert!(matches!(
            StepRegistry::build(unknown),
            Err(RegistryError::UnknownDependency { .. })
        ));

        let ordered: Vec<(PipelineStep, Box<dyn Stage>)> = vec![
            (PipelineStep::new("a", "A"), Box::new(Noop)),
            (PipelineStep::new("b", "B").depends_on(&["a"]), Box::new(Noop)),
        ];
        assert_eq!(StepRegistry::build(ordered).unwrap().len(), 2);
    }

    #[test]
    fn test_skip_predicate() {
        let step = PipelineStep::new("review", "Review")
            .skip_when(|o| (!o.interactive).then_some("interactive review disabled"));
        let mut options = RunOptions::default();
        assert_eq!(step.skip_reason(&options), Some("interactive review disabled"));
        options.interactive = true;
        assert_eq!(step.skip_reason(&options), None);
    }
}
