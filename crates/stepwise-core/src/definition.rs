// Stepwise Core - Flow definitions
//
// A flow is a declarative graph of steps. `FlowSpec` is the document form
// (YAML/JSON or built in code); `FlowDefinition` is the validated, immutable
// graph shared by every instance of the flow.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{FlowError, FlowResult};
use crate::state::{Context, StepId};

/// Characters that delimit storage keys and so cannot appear in flow or
/// variant ids
const KEY_SEPARATORS: [char; 2] = [':', '@'];

/// Context-driven branch resolver. Must return one of the step's targets.
pub type Resolver = Arc<dyn Fn(&Context) -> StepId + Send + Sync>;

/// Next step(s) as written in a flow document - a single id or a list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum NextStep {
    /// Unconditional transition
    Single(String),
    /// Branching step; destination chosen by resolver or caller
    Branch(Vec<String>),
}

/// Step declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepSpec {
    /// Next step(s); absent marks a terminal step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<NextStep>,

    /// Free-form annotations for the view layer (titles, prompts, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl StepSpec {
    /// Step that always continues to `next`
    pub fn to(next: impl Into<String>) -> Self {
        Self {
            next: Some(NextStep::Single(next.into())),
            meta: None,
        }
    }

    /// Branching step
    pub fn branch<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            next: Some(NextStep::Branch(targets.into_iter().map(Into::into).collect())),
            meta: None,
        }
    }

    /// Step that ends the flow
    pub fn terminal() -> Self {
        Self::default()
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Flow document
///
/// Example:
/// ```yaml
/// id: onboarding
/// start: welcome
/// steps:
///   welcome:
///     next: account-type
///   account-type:
///     next: [business, personal]
///   business:
///     next: complete
///   personal:
///     next: complete
///   complete: {}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowSpec {
    /// Logical flow identity, stable across variants
    pub id: String,

    /// Alternate graph sharing the same `id` (A/B variants)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,

    /// Entry step
    pub start: String,

    /// Step graph
    pub steps: BTreeMap<String, StepSpec>,
}

impl FlowSpec {
    pub fn new(id: impl Into<String>, start: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            variant_id: None,
            start: start.into(),
            steps: BTreeMap::new(),
        }
    }

    pub fn variant(mut self, variant_id: impl Into<String>) -> Self {
        self.variant_id = Some(variant_id.into());
        self
    }

    pub fn step(mut self, id: impl Into<String>, spec: StepSpec) -> Self {
        self.steps.insert(id.into(), spec);
        self
    }

    /// Validate and freeze into a `FlowDefinition`
    pub fn build(self) -> FlowResult<FlowDefinition> {
        FlowDefinition::new(self)
    }

    /// Parse a YAML flow document
    pub fn from_yaml(content: &str) -> FlowResult<Self> {
        let de = serde_yaml::Deserializer::from_str(content);
        serde_path_to_error::deserialize(de).map_err(|e| {
            FlowError::config(format!("invalid flow document at '{}': {}", e.path(), e.inner()))
        })
    }

    /// Parse a JSON flow document
    pub fn from_json(content: &str) -> FlowResult<Self> {
        let mut de = serde_json::Deserializer::from_str(content);
        serde_path_to_error::deserialize(&mut de).map_err(|e| {
            FlowError::config(format!("invalid flow document at '{}': {}", e.path(), e.inner()))
        })
    }

    /// Load a flow document from disk; `.json` files are parsed as JSON,
    /// everything else as YAML
    pub fn from_file(path: impl AsRef<Path>) -> FlowResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlowError::config(format!("Failed to read flow file {}: {}", path.display(), e))
        })?;

        if path.extension().map_or(false, |e| e == "json") {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }
}

/// Resolved transition rule of a step
#[derive(Clone)]
pub enum NextSpec {
    /// Ends the flow
    Terminal,
    /// Always continues to the given step
    Single(StepId),
    /// Continues to one of `targets`, chosen by `resolver` or by the caller
    Branch {
        targets: Vec<StepId>,
        resolver: Option<Resolver>,
    },
}

impl NextSpec {
    pub fn targets(&self) -> Vec<&str> {
        match self {
            NextSpec::Terminal => Vec::new(),
            NextSpec::Single(next) => vec![next.as_str()],
            NextSpec::Branch { targets, .. } => targets.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Debug for NextSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextSpec::Terminal => f.write_str("Terminal"),
            NextSpec::Single(next) => f.debug_tuple("Single").field(next).finish(),
            NextSpec::Branch { targets, resolver } => f
                .debug_struct("Branch")
                .field("targets", targets)
                .field("resolver", &resolver.as_ref().map(|_| "<fn>"))
                .finish(),
        }
    }
}

/// A validated step
#[derive(Debug, Clone)]
pub struct StepNode {
    pub next: NextSpec,
    pub meta: Option<serde_json::Value>,
}

/// Immutable, validated flow graph. Share it with `Arc` across instances.
#[derive(Debug, Clone)]
pub struct FlowDefinition {
    id: String,
    variant_id: Option<String>,
    start: StepId,
    steps: HashMap<StepId, StepNode>,
}

impl FlowDefinition {
    /// Validate a flow document.
    ///
    /// Fails with `FlowError::Config` when the start step or any `next`
    /// target is undeclared, when a branching step lists fewer than two
    /// targets, or when the flow or variant id contains `:` or `@`.
    pub fn new(spec: FlowSpec) -> FlowResult<Self> {
        if spec.id.trim().is_empty() {
            return Err(FlowError::config("flow id is required"));
        }
        if let Some(c) = spec.id.chars().find(|c| KEY_SEPARATORS.contains(c)) {
            return Err(FlowError::config(format!(
                "flow id '{}' must not contain '{}'",
                spec.id, c
            )));
        }
        if let Some(variant) = &spec.variant_id {
            if let Some(c) = variant.chars().find(|c| KEY_SEPARATORS.contains(c)) {
                return Err(FlowError::config(format!(
                    "variant id '{}' of flow '{}' must not contain '{}'",
                    variant, spec.id, c
                )));
            }
        }
        if spec.steps.is_empty() {
            return Err(FlowError::config(format!(
                "flow '{}' declares no steps",
                spec.id
            )));
        }
        if !spec.steps.contains_key(&spec.start) {
            return Err(FlowError::config(format!(
                "start step '{}' is not declared in flow '{}'",
                spec.start, spec.id
            )));
        }

        let mut steps = HashMap::with_capacity(spec.steps.len());
        for (step_id, step) in &spec.steps {
            let next = match &step.next {
                None => NextSpec::Terminal,
                Some(NextStep::Single(target)) => {
                    check_target(&spec, step_id, target)?;
                    NextSpec::Single(target.clone())
                }
                Some(NextStep::Branch(targets)) => {
                    if targets.len() < 2 {
                        return Err(FlowError::config(format!(
                            "branching step '{}' must list at least two targets, got {}",
                            step_id,
                            targets.len()
                        )));
                    }
                    let mut seen = HashSet::new();
                    for target in targets {
                        check_target(&spec, step_id, target)?;
                        if !seen.insert(target.as_str()) {
                            return Err(FlowError::config(format!(
                                "branching step '{}' lists target '{}' twice",
                                step_id, target
                            )));
                        }
                    }
                    NextSpec::Branch {
                        targets: targets.clone(),
                        resolver: None,
                    }
                }
            };
            steps.insert(
                step_id.clone(),
                StepNode {
                    next,
                    meta: step.meta.clone(),
                },
            );
        }

        tracing::debug!(flow_id = %spec.id, steps = steps.len(), "Flow definition validated");

        Ok(Self {
            id: spec.id,
            variant_id: spec.variant_id,
            start: spec.start,
            steps,
        })
    }

    /// Attach context-driven resolvers to branching steps.
    ///
    /// ```rust
    /// # use stepwise_core::{FlowSpec, StepSpec};
    /// # use serde_json::Value;
    /// let flow = FlowSpec::new("survey", "kind")
    ///     .step("kind", StepSpec::branch(["a", "b"]))
    ///     .step("a", StepSpec::terminal())
    ///     .step("b", StepSpec::terminal())
    ///     .build()?
    ///     .with(|r| {
    ///         r.resolve("kind", |ctx| {
    ///             if ctx.get("type") == Some(&Value::from("x")) { "a".into() } else { "b".into() }
    ///         });
    ///     })?;
    /// # Ok::<(), stepwise_core::FlowError>(())
    /// ```
    pub fn with<F>(mut self, configure: F) -> FlowResult<Self>
    where
        F: FnOnce(&mut ResolverBuilder),
    {
        let mut builder = ResolverBuilder::default();
        configure(&mut builder);

        for (step_id, resolver) in builder.resolvers {
            let node = self.steps.get_mut(&step_id).ok_or_else(|| {
                FlowError::config(format!(
                    "resolver registered for unknown step '{}' in flow '{}'",
                    step_id, self.id
                ))
            })?;
            match &mut node.next {
                NextSpec::Branch { resolver: slot, .. } => *slot = Some(resolver),
                _ => {
                    return Err(FlowError::config(format!(
                        "resolver registered for step '{}' which is not a branching step",
                        step_id
                    )))
                }
            }
        }

        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn variant_id(&self) -> Option<&str> {
        self.variant_id.as_deref()
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn step(&self, step_id: &str) -> Option<&StepNode> {
        self.steps.get(step_id)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.steps.contains_key(step_id)
    }

    /// Step ids in lexical order
    pub fn step_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_terminal(&self, step_id: &str) -> bool {
        matches!(
            self.steps.get(step_id).map(|s| &s.next),
            Some(NextSpec::Terminal)
        )
    }

    pub fn targets(&self, step_id: &str) -> Vec<&str> {
        self.steps
            .get(step_id)
            .map(|s| s.next.targets())
            .unwrap_or_default()
    }

    pub fn has_resolver(&self, step_id: &str) -> bool {
        matches!(
            self.steps.get(step_id).map(|s| &s.next),
            Some(NextSpec::Branch {
                resolver: Some(_),
                ..
            })
        )
    }

    /// Determine the destination of leaving `from`.
    ///
    /// An explicit `target` is validated against the step's targets and wins
    /// over a registered resolver. Without a target, single steps continue
    /// to their successor and branching steps consult their resolver.
    pub fn resolve(
        &self,
        from: &str,
        context: &Context,
        target: Option<&str>,
    ) -> FlowResult<StepId> {
        let node = self.steps.get(from).ok_or_else(|| {
            FlowError::navigation(format!("step '{}' is not part of flow '{}'", from, self.id))
        })?;

        match (&node.next, target) {
            (NextSpec::Terminal, _) => Err(FlowError::navigation(format!(
                "step '{}' is terminal; flow '{}' has no next step",
                from, self.id
            ))),
            (NextSpec::Single(next), None) => Ok(next.clone()),
            (NextSpec::Single(next), Some(target)) => {
                if target == next {
                    Ok(next.clone())
                } else {
                    Err(FlowError::navigation(format!(
                        "'{}' is not a valid target of step '{}' (expected '{}')",
                        target, from, next
                    )))
                }
            }
            (NextSpec::Branch { targets, .. }, Some(target)) => {
                if targets.iter().any(|t| t == target) {
                    Ok(target.to_string())
                } else {
                    Err(FlowError::navigation(format!(
                        "'{}' is not a valid target of step '{}' (expected one of {:?})",
                        target, from, targets
                    )))
                }
            }
            (NextSpec::Branch { targets, resolver }, None) => match resolver {
                Some(resolver) => {
                    let chosen = resolver(context);
                    if targets.iter().any(|t| *t == chosen) {
                        Ok(chosen)
                    } else {
                        Err(FlowError::config(format!(
                            "resolver for step '{}' returned '{}', which is not one of {:?}",
                            from, chosen, targets
                        )))
                    }
                }
                None => Err(FlowError::navigation(format!(
                    "step '{}' branches to {:?} and has no resolver; an explicit target is required",
                    from, targets
                ))),
            },
        }
    }
}

fn check_target(spec: &FlowSpec, step_id: &str, target: &str) -> FlowResult<()> {
    if spec.steps.contains_key(target) {
        Ok(())
    } else {
        Err(FlowError::config(format!(
            "step '{}' points to undeclared step '{}'",
            step_id, target
        )))
    }
}

/// Collects resolvers for `FlowDefinition::with`
#[derive(Default)]
pub struct ResolverBuilder {
    resolvers: Vec<(StepId, Resolver)>,
}

impl ResolverBuilder {
    /// Register a resolver for a branching step
    pub fn resolve<F>(&mut self, step_id: impl Into<StepId>, resolver: F) -> &mut Self
    where
        F: Fn(&Context) -> StepId + Send + Sync + 'static,
    {
        self.resolvers.push((step_id.into(), Arc::new(resolver)));
        self
    }
}
