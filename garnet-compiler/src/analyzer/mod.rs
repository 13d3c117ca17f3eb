//! Fixed-point type inference and lowering to the typed IR.
//!
//! Each pass lowers the whole program from the top-level body, instantiating
//! non-yielding methods per receiver/argument types and expanding yielding calls
//! inline at their call sites. Passes repeat until no table changes.

mod calls;
mod expr;

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::ast::{Block, Body, Expression, FunctionDefinition, NodeId};
use crate::closure::ClosureInfo;
use crate::completion::{BreakTarget, CallSiteId, CompletionSet, FrameId, LoopId};
use crate::error::AnalysisError;
use crate::exits::{exit_method, ExitTargets, LexicalTarget};
use crate::ir::{
    LocalId, LocalSlot, TypedExpr, TypedExprKind, TypedMethod, TypedMethodId, TypedProgram,
};
use crate::program::{MethodId, ProgramIndex};
use crate::types::{merge, merge_optional, ObjectType, Type};

type Lowered = (TypedExpr, CompletionSet);

#[derive(Debug, Clone, Copy)]
pub struct AnalyzerOptions {
    pub max_passes: usize,
    pub max_inline_depth: usize,
    pub max_dispatch_arms: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            max_passes: 32,
            max_inline_depth: 64,
            max_dispatch_arms: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InstanceKey {
    method: MethodId,
    self_type: Type,
    arguments: Vec<Type>,
}

/// One level of lexical-and-expansion nesting. Local variable types are keyed
/// by the full path so every expansion of a method types its locals separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ScopeStep {
    Main,
    Instance(InstanceKey),
    Inline { site: NodeId, key: InstanceKey },
    Block(NodeId),
}

type ScopePath = Vec<ScopeStep>;
type VarKey = (ScopePath, String);

/// Everything a pass learns. Types only grow while layouts are stable.
#[derive(Debug, Clone, Default, PartialEq)]
struct Tables {
    vars: HashMap<VarKey, Type>,
    methods: HashMap<InstanceKey, Option<Type>>,
    layouts: HashMap<String, ObjectType>,
    globals: HashMap<String, Type>,
    constants: HashMap<String, Type>,
}

fn merge_into<K: Eq + Hash>(table: &mut HashMap<K, Type>, key: K, ty: &Type) {
    match table.get_mut(&key) {
        Some(existing) => *existing = existing.union_with(ty),
        None => {
            table.insert(key, ty.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuntimeTarget {
    Frame(FrameId),
    Break(BreakTarget),
}

/// The block a yielding method was expanded with.
#[derive(Debug, Clone, Copy)]
struct BlockRef<'a> {
    block: &'a Block,
    site: CallSiteId,
    /// Activation the block literal was written in.
    definer: usize,
}

struct Activation<'a> {
    path: ScopePath,
    method_name: String,
    self_type: Type,
    self_local: LocalId,
    block: Option<BlockRef<'a>>,
    /// Set for block bodies, together with `parent`.
    lexical_block: Option<NodeId>,
    parent: Option<usize>,
    bindings: Vec<(LexicalTarget, RuntimeTarget)>,
}

#[derive(Default)]
struct MethodBuilder {
    slots: Vec<LocalSlot>,
    keys: Vec<Option<VarKey>>,
    index: HashMap<VarKey, LocalId>,
    temps: usize,
}

impl MethodBuilder {
    fn slot(&mut self, key: VarKey) -> LocalId {
        if let Some(id) = self.index.get(&key) {
            return *id;
        }
        let id = LocalId(self.slots.len() as u32);
        self.slots.push(LocalSlot {
            id,
            name: key.1.clone(),
            ty: None,
            captured: false,
        });
        self.keys.push(Some(key.clone()));
        self.index.insert(key, id);
        id
    }

    fn temp(&mut self, ty: Type) -> LocalId {
        let id = LocalId(self.slots.len() as u32);
        self.slots.push(LocalSlot {
            id,
            name: format!("%tmp{}", self.temps),
            ty: Some(ty),
            captured: false,
        });
        self.keys.push(None);
        self.temps += 1;
        id
    }

    fn slot_mut(&mut self, id: LocalId) -> Option<&mut LocalSlot> {
        self.slots.get_mut(id.0 as usize)
    }

    /// Slots of every local declared in `prefix` or a scope nested in it.
    fn slots_under(&self, prefix: &ScopePath) -> Vec<LocalId> {
        self.keys
            .iter()
            .enumerate()
            .filter(|(_, key)| matches!(key, Some((path, _)) if path.starts_with(prefix)))
            .map(|(index, _)| LocalId(index as u32))
            .collect()
    }

    fn finish(self, vars: &HashMap<VarKey, Type>) -> Vec<LocalSlot> {
        self.slots
            .into_iter()
            .zip(self.keys)
            .map(|(mut slot, key)| {
                if let Some(ty) = key.and_then(|key| vars.get(&key)) {
                    slot.ty = Some(ty.clone());
                }
                slot
            })
            .collect()
    }
}

pub struct Analyzer<'a> {
    program: &'a ProgramIndex,
    exits: &'a ExitTargets,
    closures: &'a ClosureInfo,
    options: AnalyzerOptions,
    tables: Tables,
    activations: Vec<Activation<'a>>,
    builders: Vec<MethodBuilder>,
    instances: HashMap<InstanceKey, TypedMethodId>,
    methods: Vec<Option<TypedMethod>>,
    next_frame: u32,
    next_site: u32,
    next_loop: u32,
    inline_depth: usize,
    /// Locals assigned on every path reaching the expression being lowered.
    assigned: HashSet<VarKey>,
    errors: Vec<AnalysisError>,
}

impl<'a> Analyzer<'a> {
    pub fn new(
        program: &'a ProgramIndex,
        exits: &'a ExitTargets,
        closures: &'a ClosureInfo,
        options: AnalyzerOptions,
    ) -> Self {
        Self {
            program,
            exits,
            closures,
            options,
            tables: Tables::default(),
            activations: Vec::new(),
            builders: Vec::new(),
            instances: HashMap::new(),
            methods: Vec::new(),
            next_frame: 0,
            next_site: 0,
            next_loop: 0,
            inline_depth: 0,
            assigned: HashSet::new(),
            errors: Vec::new(),
        }
    }

    /// Analyze the concatenation of `main` as the program's top-level body.
    ///
    /// Errors are only reported from the pass that reached the fixed point.
    #[tracing::instrument(skip_all, fields(bodies = main.len()))]
    pub fn analyze(mut self, main: &[&'a Body]) -> Result<TypedProgram, Vec<AnalysisError>> {
        let statements: Vec<&'a Expression> = main
            .iter()
            .flat_map(|body| body.expressions.iter())
            .collect();

        for pass in 1..=self.options.max_passes {
            let snapshot = self.tables.clone();
            self.reset_pass();
            let program = self.lower_program(&statements);

            if self.tables.layouts != snapshot.layouts {
                tracing::debug!(
                    pass,
                    "instance variable layouts changed, discarding derived types"
                );
                self.tables = Tables {
                    layouts: std::mem::take(&mut self.tables.layouts),
                    ..Tables::default()
                };
                continue;
            }

            if self.tables == snapshot {
                tracing::debug!(pass, methods = program.methods.len(), "fixed point reached");
                if self.errors.is_empty() {
                    return Ok(program);
                }
                let mut unique: Vec<AnalysisError> = Vec::new();
                for error in self.errors.drain(..) {
                    if !unique.contains(&error) {
                        unique.push(error);
                    }
                }
                return Err(unique);
            }

            tracing::debug!(pass, "types changed, running another pass");
        }

        Err(vec![AnalysisError::NonTerminatingFixedPoint {
            passes: self.options.max_passes,
        }])
    }

    fn reset_pass(&mut self) {
        self.activations.clear();
        self.builders.clear();
        self.instances.clear();
        self.methods.clear();
        self.next_frame = 0;
        self.next_site = 0;
        self.next_loop = 0;
        self.inline_depth = 0;
        self.assigned.clear();
        self.errors.clear();
    }

    fn lower_program(&mut self, statements: &[&'a Expression]) -> TypedProgram {
        let frame = self.fresh_frame();
        let path = vec![ScopeStep::Main];
        self.builders.push(MethodBuilder::default());
        let self_local = self.declare_self(&path, Type::main());
        self.activations.push(Activation {
            path,
            method_name: "main".to_string(),
            self_type: Type::main(),
            self_local,
            block: None,
            lexical_block: None,
            parent: None,
            bindings: vec![(LexicalTarget::Program, RuntimeTarget::Frame(frame))],
        });

        let (body, completions) = self.lower_statements(statements);
        self.activations.pop();
        let locals = self.finish_builder();
        let return_type = exit_method(completions, frame);

        let mut layouts: Vec<ObjectType> = self.tables.layouts.values().cloned().collect();
        layouts.sort_by(|a, b| a.name.cmp(&b.name));

        TypedProgram {
            main: TypedMethod {
                id: TypedMethodId::MAIN,
                name: "main".to_string(),
                owner: None,
                self_type: Type::main(),
                self_local,
                parameters: Vec::new(),
                locals,
                body,
                return_type,
                frame,
            },
            methods: self.methods.drain(..).flatten().collect(),
            captures: self
                .closures
                .descriptors()
                .into_iter()
                .cloned()
                .collect(),
            layouts,
        }
    }

    /// Lower one instantiation of a non-yielding method, memoised per pass.
    fn instantiate(&mut self, key: InstanceKey) -> TypedMethodId {
        if let Some(id) = self.instances.get(&key) {
            return *id;
        }
        let id = TypedMethodId(self.methods.len() as u32);
        self.methods.push(None);
        self.instances.insert(key.clone(), id);

        let program = self.program;
        let Some(method) = program.method(key.method) else {
            return id;
        };

        let frame = self.fresh_frame();
        let path = vec![ScopeStep::Instance(key.clone())];
        self.builders.push(MethodBuilder::default());
        let self_local = self.declare_self(&path, key.self_type.clone());
        let parameters = self.bind_parameters(&path, &method.definition, &key.arguments);
        self.activations.push(Activation {
            path,
            method_name: method.qualified_name(),
            self_type: key.self_type.clone(),
            self_local,
            block: None,
            lexical_block: None,
            parent: None,
            bindings: vec![(
                LexicalTarget::Method(method.definition.id),
                RuntimeTarget::Frame(frame),
            )],
        });

        let (body, completions) = self.lower_body(&method.definition.body);
        self.activations.pop();
        let locals = self.finish_builder();

        let entry = self.tables.methods.entry(key.clone()).or_insert(None);
        *entry = merge_optional(entry.take(), exit_method(completions, frame));
        let return_type = entry.clone();

        if let Some(slot) = self.methods.get_mut(id.0 as usize) {
            *slot = Some(TypedMethod {
                id,
                name: method.name().to_string(),
                owner: method.owner.clone(),
                self_type: key.self_type,
                self_local,
                parameters,
                locals,
                body,
                return_type,
                frame,
            });
        }
        id
    }

    /// Result type of an instantiation as far as it is known; `None` when it
    /// never returns or is still being lowered in its first pass.
    fn instance_type(&self, key: &InstanceKey) -> Option<Type> {
        self.tables.methods.get(key).cloned().flatten()
    }

    fn current(&self) -> usize {
        self.activations.len().saturating_sub(1)
    }

    fn activation(&self) -> &Activation<'a> {
        &self.activations[self.current()]
    }

    fn builder(&mut self) -> &mut MethodBuilder {
        let index = self.builders.len().saturating_sub(1);
        &mut self.builders[index]
    }

    fn finish_builder(&mut self) -> Vec<LocalSlot> {
        match self.builders.pop() {
            Some(builder) => builder.finish(&self.tables.vars),
            None => Vec::new(),
        }
    }

    fn declare_self(&mut self, path: &ScopePath, ty: Type) -> LocalId {
        let id = self.builder().slot((path.clone(), "self".to_string()));
        if let Some(slot) = self.builder().slot_mut(id) {
            slot.ty = Some(ty);
        }
        id
    }

    fn bind_parameters(
        &mut self,
        path: &ScopePath,
        definition: &FunctionDefinition,
        types: &[Type],
    ) -> Vec<LocalId> {
        definition
            .parameters
            .iter()
            .zip(types)
            .map(|(parameter, ty)| {
                let key = (path.clone(), parameter.name.clone());
                merge_into(&mut self.tables.vars, key.clone(), ty);
                self.assigned.insert(key.clone());
                self.builder().slot(key)
            })
            .collect()
    }

    /// Slot for local `name` seen from the current activation. Names a block
    /// captures resolve to the activation the block was written in.
    fn resolve_local(&mut self, name: &str) -> (LocalId, VarKey) {
        let mut index = self.current();
        let mut captured = false;
        while let Some(activation) = self.activations.get(index) {
            let (Some(block), Some(parent)) = (activation.lexical_block, activation.parent) else {
                break;
            };
            let Some(descriptor) = self.closures.descriptor(block) else {
                break;
            };
            let own = descriptor.parameters.iter().any(|param| param == name)
                || descriptor.block_locals.iter().any(|local| local == name);
            match descriptor.capture(name) {
                Some(capture) if !own => {
                    captured |= capture.requires_cell();
                    index = parent;
                }
                _ => break,
            }
        }

        let key = (self.activations[index].path.clone(), name.to_string());
        let id = self.builder().slot(key.clone());
        if captured {
            if let Some(slot) = self.builder().slot_mut(id) {
                slot.captured = true;
            }
        }
        (id, key)
    }

    /// Locals under `prefix` start out unassigned each time that scope is entered.
    fn forget_assigned(&mut self, prefix: &ScopePath) {
        self.assigned.retain(|(path, _)| !path.starts_with(prefix));
    }

    fn runtime_target(&self, target: LexicalTarget) -> Option<RuntimeTarget> {
        let mut index = Some(self.current());
        while let Some(current) = index {
            let activation = self.activations.get(current)?;
            if let Some((_, runtime)) = activation
                .bindings
                .iter()
                .rev()
                .find(|(lexical, _)| *lexical == target)
            {
                return Some(*runtime);
            }
            index = activation.parent;
        }
        None
    }

    fn push_binding(&mut self, lexical: LexicalTarget, runtime: RuntimeTarget) {
        let index = self.current();
        if let Some(activation) = self.activations.get_mut(index) {
            activation.bindings.push((lexical, runtime));
        }
    }

    fn pop_binding(&mut self) {
        let index = self.current();
        if let Some(activation) = self.activations.get_mut(index) {
            activation.bindings.pop();
        }
    }

    fn fresh_frame(&mut self) -> FrameId {
        let id = FrameId(self.next_frame);
        self.next_frame += 1;
        id
    }

    fn fresh_site(&mut self) -> CallSiteId {
        let id = CallSiteId(self.next_site);
        self.next_site += 1;
        id
    }

    fn fresh_loop(&mut self) -> LoopId {
        let id = LoopId(self.next_loop);
        self.next_loop += 1;
        id
    }

    /// The current layout of `class`. Nested object types inside it are nominal.
    fn object_type(&self, class: &str) -> Type {
        match self.tables.layouts.get(class) {
            Some(layout) => Type::Object(layout.clone()),
            None => Type::object(class),
        }
    }

    /// Replace every object member by the current layout of its class.
    fn expand(&self, ty: &Type) -> Type {
        let members: Vec<Type> = ty
            .members()
            .into_iter()
            .map(|member| match member {
                Type::Object(object) => self.object_type(&object.name),
                other => other.clone(),
            })
            .collect();
        merge(&members).unwrap_or_else(|| ty.clone())
    }

    fn merge_layout(&mut self, class: &str, name: &str, ty: &Type) {
        let stored = nominal(ty);
        let layout = self
            .tables
            .layouts
            .entry(class.to_string())
            .or_insert_with(|| ObjectType::new(class));
        let merged = match layout.var(name) {
            Some(existing) => existing.union_with(&stored),
            None => stored,
        };
        if layout.var(name) != Some(&merged) {
            *layout = layout.clone().with_var(name, merged);
        }
    }

    /// Record `error` and stand in for the failed expression with one that never completes.
    fn failed(&mut self, error: AnalysisError) -> Lowered {
        self.errors.push(error);
        (
            TypedExpr::new(TypedExprKind::Sequence(Vec::new()), None),
            CompletionSet::never(),
        )
    }
}

/// Object members reduced to their class name, so recursive layouts stay finite.
fn nominal(ty: &Type) -> Type {
    let members: Vec<Type> = ty
        .members()
        .into_iter()
        .map(|member| match member {
            Type::Object(object) => Type::object(object.name.clone()),
            other => other.clone(),
        })
        .collect();
    merge(&members).unwrap_or_else(|| ty.clone())
}

/// Locals assigned on every alternative that falls through. When none does,
/// the code after them is unreachable and `before` is kept.
fn assigned_on_all_paths(
    before: HashSet<VarKey>,
    paths: Vec<(bool, HashSet<VarKey>)>,
) -> HashSet<VarKey> {
    let mut live = paths
        .into_iter()
        .filter(|(falls_through, _)| *falls_through)
        .map(|(_, assigned)| assigned);
    let Some(first) = live.next() else {
        return before;
    };
    live.fold(first, |all, assigned| {
        all.intersection(&assigned).cloned().collect()
    })
}

fn finish(kind: TypedExprKind, completions: CompletionSet) -> Lowered {
    (
        TypedExpr::new(kind, completions.normal_type().cloned()),
        completions,
    )
}
