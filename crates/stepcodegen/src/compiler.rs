use crate::emit::{self, Bindings};
use crate::error::CompileError;
use crate::output::CompiledWorkflow;
use std::collections::BTreeMap;
use std::sync::Arc;
use stepcore::expr::{self, Expr};
use stepcore::template::{self, TemplateRef};
use stepcore::{
    validate_structure, Branch, Edge, Graph, JoinMode, Node, NodeConfig, NodeKind, ResolutionError,
    TransformConfig, TransformKind, Value,
};
use stepruntime::{ActionDescriptor, ActionRegistry, ExecutionPlan};
use tracing::{debug, info};

const RUNTIME_PRELUDE: &str = include_str!("../templates/runtime.ts");

/// Compile `graph` with the default fan-in rule.
pub fn compile(graph: &Graph, registry: &ActionRegistry) -> Result<CompiledWorkflow, CompileError> {
    Compiler::new(graph, registry).compile()
}

/// Step module imported by the generated program
struct StepImport {
    /// Name the step is called by in the entry module.
    local_name: String,
    path: String,
    descriptor: Arc<ActionDescriptor>,
}

/// Lowers a graph to a standalone TypeScript module
pub struct Compiler<'a> {
    graph: &'a Graph,
    registry: &'a ActionRegistry,
    fan_in: JoinMode,
}

impl<'a> Compiler<'a> {
    pub fn new(graph: &'a Graph, registry: &'a ActionRegistry) -> Self {
        Self {
            graph,
            registry,
            fan_in: JoinMode::Any,
        }
    }

    /// Join rule for nodes that do not declare one.
    pub fn with_fan_in(mut self, fan_in: JoinMode) -> Self {
        self.fan_in = fan_in;
        self
    }

    pub fn compile(self) -> Result<CompiledWorkflow, CompileError> {
        let steps = self.resolve_steps()?;
        validate_structure(self.graph, self.registry)?;
        let plan = ExecutionPlan::build(self.graph)?;
        self.check_references(&plan)?;

        let bindings = emit::node_variables(self.graph.nodes.iter().map(|n| n.id.as_str()));
        let function_name = function_name(self.graph.name.as_deref());
        let source = self.emit_program(&plan, &bindings, &steps, &function_name)?;

        let mut step_sources = BTreeMap::new();
        for step in steps.values() {
            step_sources.insert(step.path.clone(), step.descriptor.source_template.clone());
        }
        let action_ids: Vec<&str> = steps.keys().map(String::as_str).collect();

        info!(
            workflow = %function_name,
            nodes = self.graph.nodes.len(),
            steps = step_sources.len(),
            "Compiled workflow"
        );

        Ok(CompiledWorkflow {
            function_name,
            source,
            step_sources,
            dependencies: self.registry.dependencies_for(action_ids.iter().copied()),
            env_vars: self.registry.env_vars_for(action_ids.iter().copied()),
        })
    }

    /// Descriptor and import for every action used, keyed by canonical id.
    /// Runs before structural validation so an unknown identifier is
    /// reported as such.
    fn resolve_steps(&self) -> Result<BTreeMap<String, StepImport>, CompileError> {
        let mut steps: BTreeMap<String, StepImport> = BTreeMap::new();
        let mut names: Vec<String> = Vec::new();

        for node in &self.graph.nodes {
            let NodeConfig::Action(action) = &node.config else {
                continue;
            };
            let action_type = action.action_type.as_deref().unwrap_or_default();
            let descriptor = self
                .registry
                .resolve(action_type)
                .ok_or_else(|| CompileError::UnknownAction {
                    node_id: node.id.clone(),
                    action_type: action_type.to_string(),
                })?;
            if steps.contains_key(&descriptor.id) {
                continue;
            }
            if descriptor.source_template.trim().is_empty() {
                return Err(CompileError::InvalidConfig {
                    node_id: node.id.clone(),
                    key: "actionType".to_string(),
                    reason: format!("action '{}' has no step source to compile", descriptor.id),
                });
            }

            let mut local_name = descriptor.step_function.clone();
            let mut n = 2;
            while names.contains(&local_name) {
                local_name = format!("{}{}", descriptor.step_function, n);
                n += 1;
            }
            names.push(local_name.clone());

            steps.insert(
                descriptor.id.clone(),
                StepImport {
                    local_name,
                    path: format!("steps/{}.ts", descriptor.id.replace('/', "-")),
                    descriptor,
                },
            );
        }
        Ok(steps)
    }

    fn descriptor(&self, node: &Node) -> Option<Arc<ActionDescriptor>> {
        node.action_type().and_then(|t| self.registry.resolve(t))
    }

    /// Every template reference must name an ancestor, and a field that
    /// ancestor is known to produce when its outputs are declared.
    fn check_references(&self, plan: &ExecutionPlan) -> Result<(), CompileError> {
        for (idx, node) in self.graph.nodes.iter().enumerate() {
            for r in self.node_references(node)? {
                let target = self.graph.node_index(&r.node_id).ok_or_else(|| {
                    CompileError::UnresolvedReference {
                        node_id: node.id.clone(),
                        target: r.node_id.clone(),
                    }
                })?;
                if !plan.is_ancestor(target, idx) {
                    return Err(CompileError::NotAncestor {
                        node_id: node.id.clone(),
                        target: r.node_id.clone(),
                    });
                }

                let head = r.field.split('.').next().unwrap_or(&r.field);
                if let Some(fields) = self.declared_outputs(&self.graph.nodes[target]) {
                    if !fields.iter().any(|f| f == head) {
                        return Err(CompileError::MissingField {
                            node_id: node.id.clone(),
                            target: r.node_id.clone(),
                            field: r.field.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn node_references(&self, node: &Node) -> Result<Vec<TemplateRef>, CompileError> {
        let malformed = |key: &str, source: ResolutionError| CompileError::MalformedTemplate {
            node_id: node.id.clone(),
            key: key.to_string(),
            source,
        };
        let mut refs = Vec::new();
        match &node.config {
            NodeConfig::Trigger(_) => {}
            NodeConfig::Action(action) => {
                for (key, value) in &action.fields {
                    if let Value::String(s) = value {
                        refs.extend(template::references(s).map_err(|e| malformed(key.as_str(), e))?);
                    }
                }
            }
            NodeConfig::Condition(_) => {
                refs.extend(self.condition(node)?.references().into_iter().cloned());
            }
            NodeConfig::Transform(transform) => {
                let mut strings: Vec<(String, &str)> = Vec::new();
                if let Some(Value::String(s)) = transform.fields.get("input") {
                    strings.push(("input".to_string(), s));
                }
                if let Some(Value::Object(mapping)) = transform.fields.get("fields") {
                    for (key, value) in mapping {
                        if let Value::String(s) = value {
                            strings.push((format!("fields.{}", key), s));
                        }
                    }
                }
                for (key, s) in strings {
                    refs.extend(template::references(s).map_err(|e| malformed(key.as_str(), e))?);
                }
            }
        }
        Ok(refs)
    }

    /// Output fields `node` is known to publish, or `None` when they depend
    /// on run-time data.
    fn declared_outputs(&self, node: &Node) -> Option<Vec<String>> {
        match &node.config {
            NodeConfig::Trigger(_) => None,
            NodeConfig::Action(_) => self
                .descriptor(node)
                .map(|d| d.output_fields.clone())
                .filter(|fields| !fields.is_empty()),
            NodeConfig::Condition(_) => Some(vec!["result".to_string()]),
            NodeConfig::Transform(t) => match transform_kind(t)? {
                TransformKind::Map => t
                    .fields
                    .get("fields")
                    .and_then(Value::as_object)
                    .map(|mapping| mapping.keys().cloned().collect()),
                TransformKind::Pick => t.fields.get("fields").and_then(pick_names),
                TransformKind::JsonStringify => Some(vec!["json".to_string()]),
                TransformKind::Merge | TransformKind::JsonParse => None,
            },
        }
    }

    fn condition(&self, node: &Node) -> Result<Expr, CompileError> {
        let source = match &node.config {
            NodeConfig::Condition(c) => c.condition.as_deref().unwrap_or_default(),
            _ => "",
        };
        expr::parse(source).map_err(|source| CompileError::InvalidCondition {
            node_id: node.id.clone(),
            source,
        })
    }

    fn emit_program(
        &self,
        plan: &ExecutionPlan,
        bindings: &Bindings,
        steps: &BTreeMap<String, StepImport>,
        function_name: &str,
    ) -> Result<String, CompileError> {
        let graph = self.graph;
        let mut w = Writer::default();

        match &graph.name {
            Some(name) => w.line(format!("// Generated by stepflow from workflow {}.", emit::string(name))),
            None => w.line("// Generated by stepflow."),
        }
        for step in steps.values() {
            let module = format!("./{}", step.path.trim_end_matches(".ts"));
            if step.local_name == step.descriptor.step_function {
                w.line(format!("import {{ {} }} from {};", step.local_name, emit::string(&module)));
            } else {
                w.line(format!(
                    "import {{ {} as {} }} from {};",
                    step.descriptor.step_function,
                    step.local_name,
                    emit::string(&module)
                ));
            }
        }
        w.blank();
        for line in RUNTIME_PRELUDE.lines() {
            w.line(line);
        }
        w.blank();
        w.line("export type WorkflowResult = {");
        w.line("  status: \"success\" | \"failed\";");
        w.line("  outputs: Record<string, Output>;");
        w.line("  errors: Record<string, string>;");
        w.line("  skipped: string[];");
        w.line("};");
        w.blank();
        w.line(format!(
            "export async function {}(input: Output = {{}}): Promise<WorkflowResult> {{",
            function_name
        ));
        w.indent();
        w.line("const outputs: Record<string, Output> = {};");
        w.line("const errors: Record<string, string> = {};");
        w.line("const skipped: string[] = [];");
        w.blank();

        let trigger = &graph.nodes[plan.trigger()];
        let trigger_var = &bindings[&trigger.id];
        w.line(format!("// {} ({})", trigger.label, trigger.id));
        let mock = match &trigger.config {
            NodeConfig::Trigger(t) => t.mock_payload(),
            _ => None,
        };
        match mock {
            Some(mock) => w.line(format!(
                "const {}: Output = Object.keys(input).length > 0 ? input : {};",
                trigger_var,
                emit::literal(&Value::Object(mock))
            )),
            None => w.line(format!("const {}: Output = input;", trigger_var)),
        }
        w.line(format!("outputs[{}] = {};", emit::string(&trigger.id), trigger_var));
        w.blank();

        let others: Vec<&Node> = graph.nodes.iter().filter(|n| n.id != trigger.id).collect();
        for node in &others {
            w.line(format!("let {}: Output | undefined;", bindings[&node.id]));
        }
        if !others.is_empty() {
            w.blank();
        }

        for layer in plan.layers() {
            let nodes: Vec<usize> = layer.iter().copied().filter(|&i| i != plan.trigger()).collect();
            match nodes.as_slice() {
                [] => continue,
                [only] => self.emit_node(&mut w, plan, *only, bindings, steps)?,
                _ => {
                    w.line("await Promise.all([");
                    w.indent();
                    for &idx in &nodes {
                        w.line("(async () => {");
                        w.indent();
                        self.emit_node(&mut w, plan, idx, bindings, steps)?;
                        w.dedent();
                        w.line("})(),");
                    }
                    w.dedent();
                    w.line("]);");
                }
            }
            w.blank();
        }

        let sinks: Vec<&str> = plan
            .sinks()
            .iter()
            .map(|&i| bindings[&graph.nodes[i].id].as_str())
            .collect();
        w.line(format!(
            "const succeeded = [{}].some((output) => output !== undefined);",
            sinks.join(", ")
        ));
        w.line("return { status: succeeded ? \"success\" : \"failed\", outputs, errors, skipped };");
        w.dedent();
        w.line("}");
        Ok(w.finish())
    }

    fn edge_live(&self, edge: &Edge, bindings: &Bindings) -> String {
        let var = &bindings[&edge.source];
        let from_condition = self
            .graph
            .find_node(&edge.source)
            .is_some_and(|n| n.kind() == NodeKind::Condition);
        if !from_condition {
            return format!("{} !== undefined", var);
        }
        match edge.branch.unwrap_or(Branch::True) {
            Branch::True => format!("{}?.result === true", var),
            Branch::False => format!("{}?.result === false", var),
        }
    }

    fn emit_node(
        &self,
        w: &mut Writer,
        plan: &ExecutionPlan,
        idx: usize,
        bindings: &Bindings,
        steps: &BTreeMap<String, StepImport>,
    ) -> Result<(), CompileError> {
        let node = &self.graph.nodes[idx];
        let var = &bindings[&node.id];
        let id = emit::string(&node.id);
        debug!(node = %node.id, "Lowering node");

        let incoming: Vec<&Edge> = plan.incoming(idx).iter().map(|&e| &self.graph.edges[e]).collect();
        let live: Vec<String> = incoming.iter().map(|e| self.edge_live(e, bindings)).collect();
        let activation = match (live.is_empty(), node.join.unwrap_or(self.fan_in)) {
            (true, _) => "false".to_string(),
            (false, JoinMode::Any) => live.join(" || "),
            (false, JoinMode::All) => live.join(" && "),
        };
        let upstream = format!(
            "live({})",
            incoming
                .iter()
                .zip(&live)
                .map(|(e, l)| format!("{} ? {} : undefined", l, bindings[&e.source]))
                .collect::<Vec<_>>()
                .join(", ")
        );

        w.line(format!("// {} ({})", node.label, node.id));
        w.line(format!("if ({}) {{", activation));
        w.indent();
        w.line("try {");
        w.indent();
        match &node.config {
            NodeConfig::Trigger(_) => {}
            NodeConfig::Action(action) => {
                let step = self
                    .descriptor(node)
                    .and_then(|d| steps.get(&d.id))
                    .ok_or_else(|| CompileError::UnknownAction {
                        node_id: node.id.clone(),
                        action_type: action.action_type.clone().unwrap_or_default(),
                    })?;
                let mut args = Vec::new();
                for (key, value) in &action.fields {
                    args.push(format!("{}: {}", emit::string(key), self.value(node, key, value, bindings)?));
                }
                let call = if args.is_empty() {
                    format!("{}({{}})", step.local_name)
                } else {
                    format!("{}({{ {} }})", step.local_name, args.join(", "))
                };
                match node.retry.as_ref().filter(|p| p.max_attempts > 1) {
                    Some(p) => w.line(format!(
                        "{} = await retry(() => {}, {}, {}, {}, {});",
                        var, call, p.max_attempts, p.initial_backoff_ms, p.backoff_multiplier, p.max_backoff_ms
                    )),
                    None => w.line(format!("{} = await {};", var, call)),
                }
            }
            NodeConfig::Condition(_) => {
                let expr = self.condition(node)?;
                w.line(format!("const upstream = {};", upstream));
                w.line(format!("const outcome = {};", emit::expression(&expr, bindings, "upstream")));
                w.line("if (typeof outcome !== \"boolean\") {");
                w.line("  throw new Error(`condition produced ${typeof outcome}, expected a boolean`);");
                w.line("}");
                w.line(format!("{} = {{ result: outcome }};", var));
            }
            NodeConfig::Transform(transform) => {
                let body = self.transform(node, transform, &upstream, bindings)?;
                w.line(format!("{} = {};", var, body));
            }
        }
        w.line(format!("outputs[{}] = {};", id, var));
        w.dedent();
        w.line("} catch (error) {");
        w.line(format!("  errors[{}] = errorMessage(error);", id));
        w.line("}");
        w.dedent();
        w.line("} else {");
        w.line(format!("  skipped.push({});", id));
        w.line("}");
        Ok(())
    }

    /// A config value: strings are templates, anything else a literal.
    fn value(&self, node: &Node, key: &str, value: &Value, bindings: &Bindings) -> Result<String, CompileError> {
        match value {
            Value::String(s) => {
                let refs = template::references(s).map_err(|source| CompileError::MalformedTemplate {
                    node_id: node.id.clone(),
                    key: key.to_string(),
                    source,
                })?;
                Ok(emit::template(s, &refs, bindings))
            }
            other => Ok(emit::literal(other)),
        }
    }

    fn transform(
        &self,
        node: &Node,
        config: &TransformConfig,
        upstream: &str,
        bindings: &Bindings,
    ) -> Result<String, CompileError> {
        let kind = transform_kind(config).ok_or_else(|| CompileError::UnknownTransform {
            node_id: node.id.clone(),
            transform_type: config.transform_type.clone().unwrap_or_default(),
        })?;
        let field = |name: &str| {
            config.fields.get(name).ok_or_else(|| CompileError::InvalidConfig {
                node_id: node.id.clone(),
                key: name.to_string(),
                reason: "missing".to_string(),
            })
        };

        match kind {
            TransformKind::Map => {
                let mapping = field("fields")?.as_object().ok_or_else(|| CompileError::InvalidConfig {
                    node_id: node.id.clone(),
                    key: "fields".to_string(),
                    reason: "expected an object of output field to template".to_string(),
                })?;
                let mut entries = Vec::new();
                for (key, value) in mapping {
                    entries.push(format!(
                        "{}: {}",
                        emit::string(key),
                        self.value(node, &format!("fields.{}", key), value, bindings)?
                    ));
                }
                Ok(format!("{{ {} }}", entries.join(", ")))
            }
            TransformKind::Pick => {
                let names = pick_names(field("fields")?).ok_or_else(|| CompileError::InvalidConfig {
                    node_id: node.id.clone(),
                    key: "fields".to_string(),
                    reason: "expected a list of field names".to_string(),
                })?;
                let names: Vec<String> = names.iter().map(|n| emit::string(n)).collect();
                Ok(format!("pick({}, [{}])", upstream, names.join(", ")))
            }
            TransformKind::Merge => Ok(format!("merge({})", upstream)),
            TransformKind::JsonParse => {
                let input = field("input")?;
                Ok(format!("parseJson({})", self.value(node, "input", input, bindings)?))
            }
            TransformKind::JsonStringify => {
                let input = field("input")?;
                let json = match input {
                    Value::String(s) => {
                        let refs = template::references(s).map_err(|source| CompileError::MalformedTemplate {
                            node_id: node.id.clone(),
                            key: "input".to_string(),
                            source,
                        })?;
                        match refs.as_slice() {
                            [only] if only.span == (0..s.len()) => {
                                format!("JSON.stringify({})", emit::reference(only, bindings))
                            }
                            _ => format!("JSON.stringify({})", emit::template(s, &refs, bindings)),
                        }
                    }
                    other => emit::string(&other.to_json().to_string()),
                };
                Ok(format!("{{ json: {} }}", json))
            }
        }
    }
}

fn transform_kind(config: &TransformConfig) -> Option<TransformKind> {
    TransformKind::parse(config.transform_type.as_deref()?)
}

/// Field names for `pick`: a list, or a comma separated string.
fn pick_names(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(items.iter().filter_map(Value::as_str).map(str::to_string).collect()),
        Value::String(list) => Some(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        _ => None,
    }
}

fn function_name(workflow: Option<&str>) -> String {
    let base = workflow.map(emit::camel_ident).unwrap_or_default();
    let base = base.strip_suffix("Workflow").unwrap_or(&base);
    if base.is_empty() {
        "runWorkflow".to_string()
    } else {
        format!("{}Workflow", base)
    }
}

/// Line-oriented source buffer with two-space indentation
#[derive(Default)]
struct Writer {
    out: String,
    depth: usize,
}

impl Writer {
    fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            self.out.push_str(&"  ".repeat(self.depth));
            self.out.push_str(text);
        }
        self.out.push('\n');
    }

    fn blank(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    fn indent(&mut self) {
        self.depth += 1;
    }

    fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn finish(self) -> String {
        self.out
    }
}
