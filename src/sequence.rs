//! The sequence compiler. A behavior script arrives as a list of label
//! markers and instruction forms addressing the target node's properties by
//! dot-separated paths; it leaves as a flat instruction stream in which
//! every jump, branch and call target is an index into that same stream.
//!
//! Labels come in two flavors. A name spelled with a leading `-` or `+` is
//! a directional local label: it may be declared any number of times, and a
//! reference resolves to the nearest occurrence backward (`-`) or forward
//! (`+`) of the referencing instruction. Every other name is global within
//! its script, must be declared exactly once, and resolves regardless of
//! direction.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::codec::{Comparison, WireOp};
use crate::error::AssetError;
use crate::value::{
    AssetKind, NodeResolver, NodeSpec, RefinedValue, Type, Value, assoc, refine_value,
};

/// A sequence instruction, generic over its target addressing (symbolic
/// label vs resolved index) and its value payload (refined vs wire form).
#[derive(Debug, Clone, PartialEq)]
pub enum Op<T, V> {
    PushOffset {
        node: String,
        property: String,
    },
    Set {
        ty: Type,
        value: V,
    },
    SetString {
        value: String,
    },
    Modify {
        ty: Type,
        value: V,
    },
    ModifyF32 {
        value: f32,
    },
    ModifyF64 {
        value: f64,
    },
    BranchIfTrue {
        target: T,
    },
    BranchIfFalse {
        target: T,
    },
    BranchUint {
        comparison: Comparison,
        ty: Type,
        value: V,
        target: T,
    },
    BranchSint {
        comparison: Comparison,
        ty: Type,
        value: V,
        target: T,
    },
    BranchF32 {
        comparison: Comparison,
        value: f32,
        target: T,
    },
    BranchF64 {
        comparison: Comparison,
        value: f64,
        target: T,
    },
    Jump {
        target: T,
    },
    Call {
        target: T,
    },
    Return,
    Wait {
        frames: u16,
    },
    RunCustom {
        fname: String,
    },
    BranchCustom {
        fname: String,
        target: T,
    },
}

/// A fully compiled instruction: index-addressed, refined values.
pub type CompiledOp = Op<u32, RefinedValue>;

/// An instruction still addressing labels symbolically.
type AsmOp = Op<String, RefinedValue>;

impl<T, V> Op<T, V> {
    /// The symbolic target of a jump or branch. `Call` is excluded: call
    /// targets name subroutines, not labels.
    fn label_target(&self) -> Option<&T> {
        match self {
            Op::BranchIfTrue { target }
            | Op::BranchIfFalse { target }
            | Op::BranchUint { target, .. }
            | Op::BranchSint { target, .. }
            | Op::BranchF32 { target, .. }
            | Op::BranchF64 { target, .. }
            | Op::Jump { target }
            | Op::BranchCustom { target, .. } => Some(target),
            _ => None,
        }
    }

    fn label_target_mut(&mut self) -> Option<&mut T> {
        match self {
            Op::BranchIfTrue { target }
            | Op::BranchIfFalse { target }
            | Op::BranchUint { target, .. }
            | Op::BranchSint { target, .. }
            | Op::BranchF32 { target, .. }
            | Op::BranchF64 { target, .. }
            | Op::Jump { target }
            | Op::BranchCustom { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Rewrites every target, including `Call`.
    fn map_target<U>(
        self,
        f: &mut dyn FnMut(&T) -> Result<U, AssetError>,
    ) -> Result<Op<U, V>, AssetError> {
        Ok(match self {
            Op::PushOffset { node, property } => Op::PushOffset { node, property },
            Op::Set { ty, value } => Op::Set { ty, value },
            Op::SetString { value } => Op::SetString { value },
            Op::Modify { ty, value } => Op::Modify { ty, value },
            Op::ModifyF32 { value } => Op::ModifyF32 { value },
            Op::ModifyF64 { value } => Op::ModifyF64 { value },
            Op::BranchIfTrue { target } => Op::BranchIfTrue {
                target: f(&target)?,
            },
            Op::BranchIfFalse { target } => Op::BranchIfFalse {
                target: f(&target)?,
            },
            Op::BranchUint {
                comparison,
                ty,
                value,
                target,
            } => Op::BranchUint {
                comparison,
                ty,
                value,
                target: f(&target)?,
            },
            Op::BranchSint {
                comparison,
                ty,
                value,
                target,
            } => Op::BranchSint {
                comparison,
                ty,
                value,
                target: f(&target)?,
            },
            Op::BranchF32 {
                comparison,
                value,
                target,
            } => Op::BranchF32 {
                comparison,
                value,
                target: f(&target)?,
            },
            Op::BranchF64 {
                comparison,
                value,
                target,
            } => Op::BranchF64 {
                comparison,
                value,
                target: f(&target)?,
            },
            Op::Jump { target } => Op::Jump {
                target: f(&target)?,
            },
            Op::Call { target } => Op::Call {
                target: f(&target)?,
            },
            Op::Return => Op::Return,
            Op::Wait { frames } => Op::Wait { frames },
            Op::RunCustom { fname } => Op::RunCustom { fname },
            Op::BranchCustom { fname, target } => Op::BranchCustom {
                fname,
                target: f(&target)?,
            },
        })
    }
}

impl CompiledOp {
    /// Lowers into the wire shape, resolving asset references in literal
    /// values into their current ids.
    pub fn lower(
        &self,
        ids: &mut dyn FnMut(AssetKind, &str) -> Option<u32>,
    ) -> Result<WireOp, AssetError> {
        Ok(match self {
            Op::PushOffset { node, property } => Op::PushOffset {
                node: node.clone(),
                property: property.clone(),
            },
            Op::Set { ty, value } => Op::Set {
                ty: ty.clone(),
                value: value.lower(ids)?,
            },
            Op::SetString { value } => Op::SetString {
                value: value.clone(),
            },
            Op::Modify { ty, value } => Op::Modify {
                ty: ty.clone(),
                value: value.lower(ids)?,
            },
            Op::ModifyF32 { value } => Op::ModifyF32 { value: *value },
            Op::ModifyF64 { value } => Op::ModifyF64 { value: *value },
            Op::BranchIfTrue { target } => Op::BranchIfTrue { target: *target },
            Op::BranchIfFalse { target } => Op::BranchIfFalse { target: *target },
            Op::BranchUint {
                comparison,
                ty,
                value,
                target,
            } => Op::BranchUint {
                comparison: *comparison,
                ty: ty.clone(),
                value: value.lower(ids)?,
                target: *target,
            },
            Op::BranchSint {
                comparison,
                ty,
                value,
                target,
            } => Op::BranchSint {
                comparison: *comparison,
                ty: ty.clone(),
                value: value.lower(ids)?,
                target: *target,
            },
            Op::BranchF32 {
                comparison,
                value,
                target,
            } => Op::BranchF32 {
                comparison: *comparison,
                value: *value,
                target: *target,
            },
            Op::BranchF64 {
                comparison,
                value,
                target,
            } => Op::BranchF64 {
                comparison: *comparison,
                value: *value,
                target: *target,
            },
            Op::Jump { target } => Op::Jump { target: *target },
            Op::Call { target } => Op::Call { target: *target },
            Op::Return => Op::Return,
            Op::Wait { frames } => Op::Wait { frames: *frames },
            Op::RunCustom { fname } => Op::RunCustom {
                fname: fname.clone(),
            },
            Op::BranchCustom { fname, target } => Op::BranchCustom {
                fname: fname.clone(),
                target: *target,
            },
        })
    }
}

/// A compiled sequence: the target node and the flat instruction stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSequence {
    pub node: String,
    pub ops: Vec<CompiledOp>,
}

enum ScriptItem {
    Label(String),
    Op(AsmOp),
}

#[derive(Clone, Copy, PartialEq)]
enum Direction {
    Backward,
    Forward,
}

fn direction(label: &str) -> Option<Direction> {
    match label.as_bytes().first() {
        Some(b'-') => Some(Direction::Backward),
        Some(b'+') => Some(Direction::Forward),
        _ => None,
    }
}

/// Compiles a raw sequence declaration against the declared node types.
pub fn compile_sequence(
    value: &Value,
    res: &mut dyn NodeResolver,
) -> Result<CompiledSequence, AssetError> {
    let entries = value.as_list()?;

    let node = match assoc(entries, "node")? {
        Some([name]) => name.as_sym()?.to_owned(),
        _ => return Err(AssetError::new("sequence must name a single target node")),
    };
    let spec = res.node_spec(&node)?;

    let main = assoc(entries, "script")?
        .ok_or_else(|| AssetError::new("sequence is missing a script"))?;

    let mut subs: Vec<(String, &[Value])> = Vec::new();
    for entry in assoc(entries, "subs")?.unwrap_or(&[]) {
        let items = entry.as_list()?;
        let Some((name, body)) = items.split_first() else {
            return Err(AssetError::new("subroutine must have a name"));
        };
        let name = name.as_sym()?;
        if subs.iter().any(|(n, _)| n == name) {
            return Err(AssetError::new(format!("duplicate subroutine '{name}'")));
        }
        subs.push((name.to_owned(), body));
    }
    let sub_names: HashSet<&str> = subs.iter().map(|(n, _)| n.as_str()).collect();

    // Refine, validate and rename each script independently; label
    // namespaces never cross subroutine/main boundaries.
    let mut scripts = Vec::with_capacity(subs.len() + 1);
    for (id, body) in std::iter::once(("main".to_owned(), main))
        .chain(subs.iter().map(|(n, b)| (format!("sub-{n}"), *b)))
    {
        let mut items = refine_script(body, &spec, res)?;
        validate_labels(&items)?;
        validate_calls(&items, &sub_names)?;
        rename_labels(&mut items, &id)?;
        scripts.push((id, items));
    }

    // Merge in fixed order: main first, then subroutines in declaration
    // order, each prefixed with its entry label and terminated explicitly
    // so control never falls through into the next script.
    let mut merged: Vec<ScriptItem> = Vec::new();
    for (id, items) in scripts {
        let terminated = matches!(
            items.last(),
            Some(ScriptItem::Op(Op::Return | Op::Jump { .. }))
        );
        merged.push(ScriptItem::Label(id));
        merged.extend(items);
        if !terminated {
            merged.push(ScriptItem::Op(Op::Return));
        }
    }

    // Final resolution: labels consume no slot in the instruction stream.
    let mut positions: HashMap<String, u32> = HashMap::new();
    let mut ops: Vec<AsmOp> = Vec::new();
    for item in merged {
        match item {
            ScriptItem::Label(name) => {
                positions.insert(name, ops.len() as u32);
            }
            ScriptItem::Op(op) => ops.push(op),
        }
    }
    let ops = ops
        .into_iter()
        .map(|op| {
            op.map_target(&mut |label| {
                positions
                    .get(label)
                    .copied()
                    .ok_or_else(|| AssetError::new(format!("unresolved label '{label}'")))
            })
        })
        .collect::<Result<_, _>>()?;

    Ok(CompiledSequence { node, ops })
}

fn refine_script(
    body: &[Value],
    spec: &NodeSpec,
    res: &mut dyn NodeResolver,
) -> Result<Vec<ScriptItem>, AssetError> {
    let mut items = Vec::new();
    for item in body {
        match item {
            Value::Sym(label) => items.push(ScriptItem::Label(label.clone())),
            Value::List(form) => refine_form(form, spec, res, &mut items)?,
            other => {
                return Err(AssetError::new(format!(
                    "script item must be a label or an instruction form, got {}",
                    other.kind_name()
                )));
            }
        }
    }
    Ok(items)
}

fn refine_form(
    form: &[Value],
    spec: &NodeSpec,
    res: &mut dyn NodeResolver,
    out: &mut Vec<ScriptItem>,
) -> Result<(), AssetError> {
    let Some((head, args)) = form.split_first() else {
        return Err(AssetError::new("empty instruction form"));
    };
    match head.as_sym()? {
        "set" => {
            let [path, value] = args else {
                return Err(AssetError::new("set takes a property path and a value"));
            };
            let ty = push_path(path.as_sym()?, spec, res, out)?;
            let op = match refine_value(value, &ty, res)? {
                RefinedValue::String(value) => Op::SetString { value },
                value => Op::Set { ty, value },
            };
            out.push(ScriptItem::Op(op));
        }
        "modify" => {
            let [path, value] = args else {
                return Err(AssetError::new("modify takes a property path and a value"));
            };
            let path = path.as_sym()?;
            let ty = push_path(path, spec, res, out)?;
            if !ty.is_numeric() {
                return Err(AssetError::new(format!(
                    "cannot modify '{path}': modify requires a numeric property, got {ty}"
                )));
            }
            let op = match refine_value(value, &ty, res)? {
                RefinedValue::F32(value) => Op::ModifyF32 { value },
                RefinedValue::F64(value) => Op::ModifyF64 { value },
                value => Op::Modify { ty, value },
            };
            out.push(ScriptItem::Op(op));
        }
        "branch" => {
            let [cond, label] = args else {
                return Err(AssetError::new("branch takes a condition and a label"));
            };
            let target = label.as_sym()?.to_owned();
            let op = refine_condition(cond, target, spec, res, out)?;
            out.push(ScriptItem::Op(op));
        }
        "jump" => {
            let [label] = args else {
                return Err(AssetError::new("jump takes a label"));
            };
            out.push(ScriptItem::Op(Op::Jump {
                target: label.as_sym()?.to_owned(),
            }));
        }
        "call" => {
            let [sub] = args else {
                return Err(AssetError::new("call takes a subroutine name"));
            };
            out.push(ScriptItem::Op(Op::Call {
                target: sub.as_sym()?.to_owned(),
            }));
        }
        "return" => {
            if !args.is_empty() {
                return Err(AssetError::new("return takes no arguments"));
            }
            out.push(ScriptItem::Op(Op::Return));
        }
        "wait" => {
            let [frames] = args else {
                return Err(AssetError::new("wait takes a frame count"));
            };
            let frames = match frames {
                Value::Int(n) => u16::try_from(*n).map_err(|_| {
                    AssetError::new(format!("wait frame count {n} is out of range"))
                })?,
                other => {
                    return Err(AssetError::new(format!(
                        "wait frame count must be an exact integer, got {:?}",
                        other
                    )));
                }
            };
            out.push(ScriptItem::Op(Op::Wait { frames }));
        }
        "run-custom" => {
            let [fname] = args else {
                return Err(AssetError::new("run-custom takes a function name"));
            };
            out.push(ScriptItem::Op(Op::RunCustom {
                fname: fname.as_sym()?.to_owned(),
            }));
        }
        "branch-custom" => {
            let [fname, label] = args else {
                return Err(AssetError::new(
                    "branch-custom takes a function name and a label",
                ));
            };
            out.push(ScriptItem::Op(Op::BranchCustom {
                fname: fname.as_sym()?.to_owned(),
                target: label.as_sym()?.to_owned(),
            }));
        }
        other => {
            return Err(AssetError::new(format!("unknown instruction '{other}'")));
        }
    }
    Ok(())
}

/// Resolves a dot-separated property path against the target node,
/// descending through node-typed properties one segment at a time. Emits
/// one `PushOffset` per segment traversed and returns the type of the
/// final property.
fn push_path(
    path: &str,
    spec: &NodeSpec,
    res: &mut dyn NodeResolver,
    out: &mut Vec<ScriptItem>,
) -> Result<Type, AssetError> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = spec.clone();

    for (i, segment) in segments.iter().enumerate() {
        let var = current.property(segment).ok_or_else(|| {
            AssetError::new(format!(
                "node '{}' has no property '{segment}'",
                current.name
            ))
        })?;
        let ty = var.ty.clone();
        out.push(ScriptItem::Op(Op::PushOffset {
            node: current.name.clone(),
            property: (*segment).to_owned(),
        }));

        if i + 1 == segments.len() {
            return Ok(ty);
        }
        match ty {
            Type::Node(Some(name)) => current = res.node_spec(&name)?,
            Type::Node(None) => {
                return Err(AssetError::new(format!(
                    "cannot resolve '{path}' through the wildcard-typed property '{segment}'"
                )));
            }
            other => {
                return Err(AssetError::new(format!(
                    "cannot resolve '{path}': property '{segment}' has type {other}, not a node"
                )));
            }
        }
    }
    unreachable!("str::split yields at least one segment")
}

enum CondTest<'a> {
    IfTrue,
    IfFalse,
    Compare(Comparison, &'a Value),
}

fn refine_condition(
    cond: &Value,
    target: String,
    spec: &NodeSpec,
    res: &mut dyn NodeResolver,
    out: &mut Vec<ScriptItem>,
) -> Result<AsmOp, AssetError> {
    let (path, test) = match cond {
        Value::Sym(path) => (path.as_str(), CondTest::IfTrue),
        Value::List(items) => match items.as_slice() {
            [path] => (path.as_sym()?, CondTest::IfTrue),
            [negation, path] if negation.as_sym()? == "!" => (path.as_sym()?, CondTest::IfFalse),
            [op, path, literal] => {
                let comparison = match op.as_sym()? {
                    "=" => Comparison::Equals,
                    "!=" => Comparison::NotEquals,
                    "<" => Comparison::LessThan,
                    ">" => Comparison::GreaterThan,
                    "<=" => Comparison::LessEquals,
                    ">=" => Comparison::GreaterEquals,
                    other => {
                        return Err(AssetError::new(format!(
                            "unknown comparison operator '{other}'"
                        )));
                    }
                };
                (path.as_sym()?, CondTest::Compare(comparison, literal))
            }
            _ => return Err(AssetError::new("malformed branch condition")),
        },
        other => {
            return Err(AssetError::new(format!(
                "malformed branch condition: expected a property or comparison, got {}",
                other.kind_name()
            )));
        }
    };

    let ty = push_path(path, spec, res, out)?;
    match test {
        CondTest::IfTrue | CondTest::IfFalse => {
            if ty != Type::Bool {
                return Err(AssetError::new(format!(
                    "branch condition '{path}' must be a bool property, got {ty}"
                )));
            }
            Ok(match test {
                CondTest::IfTrue => Op::BranchIfTrue { target },
                _ => Op::BranchIfFalse { target },
            })
        }
        CondTest::Compare(comparison, literal) => {
            if !ty.is_numeric() {
                return Err(AssetError::new(format!(
                    "cannot compare '{path}': comparisons require a numeric property, got {ty}"
                )));
            }
            let value = refine_value(literal, &ty, res)?;
            Ok(match value {
                RefinedValue::F32(value) => Op::BranchF32 {
                    comparison,
                    value,
                    target,
                },
                RefinedValue::F64(value) => Op::BranchF64 {
                    comparison,
                    value,
                    target,
                },
                value if ty.is_unsigned_int() => Op::BranchUint {
                    comparison,
                    ty,
                    value,
                    target,
                },
                value => Op::BranchSint {
                    comparison,
                    ty,
                    value,
                    target,
                },
            })
        }
    }
}

/// One linear scan per script: directional labels may repeat, global
/// labels may not; a backward reference needs a prior occurrence, and
/// every forward or not-yet-declared reference must be resolved by the end
/// of the script.
fn validate_labels(items: &[ScriptItem]) -> Result<(), AssetError> {
    let mut declared: HashSet<&str> = HashSet::new();
    let mut seen_backward: HashSet<&str> = HashSet::new();
    let mut pending: BTreeSet<&str> = BTreeSet::new();

    for item in items {
        match item {
            ScriptItem::Label(name) => match direction(name) {
                Some(Direction::Backward) => {
                    seen_backward.insert(name);
                }
                Some(Direction::Forward) => {
                    pending.remove(name.as_str());
                }
                None => {
                    if !declared.insert(name) {
                        return Err(AssetError::new(format!("duplicate label '{name}'")));
                    }
                    pending.remove(name.as_str());
                }
            },
            ScriptItem::Op(op) => {
                if let Some(target) = op.label_target() {
                    match direction(target) {
                        Some(Direction::Backward) => {
                            if !seen_backward.contains(target.as_str()) {
                                return Err(AssetError::new(format!(
                                    "backward label '{target}' has no prior declaration"
                                )));
                            }
                        }
                        Some(Direction::Forward) => {
                            pending.insert(target);
                        }
                        None => {
                            if !declared.contains(target.as_str()) {
                                pending.insert(target);
                            }
                        }
                    }
                }
            }
        }
    }

    match pending.first() {
        Some(name) => Err(AssetError::new(format!("unresolved label '{name}'"))),
        None => Ok(()),
    }
}

fn validate_calls(items: &[ScriptItem], subs: &HashSet<&str>) -> Result<(), AssetError> {
    for item in items {
        if let ScriptItem::Op(Op::Call { target }) = item {
            if !subs.contains(target.as_str()) {
                return Err(AssetError::new(format!("unknown subroutine '{target}'")));
            }
        }
    }
    Ok(())
}

/// Renames every label into an opaque, script-qualified identifier so the
/// scripts can be concatenated without collisions.
///
/// Global labels become `<script>-l-<name>` in one pass. Directional
/// labels need two: a forward scan numbers backward-label occurrences (a
/// reference resolves to the latest occurrence so far), and a reverse scan
/// numbers forward-label occurrences symmetrically, since "nearest in the
/// indicated direction" depends on everything that follows the reference.
fn rename_labels(items: &mut [ScriptItem], script: &str) -> Result<(), AssetError> {
    // Global labels rename positionally; this must run before the
    // directional passes so their output (which no longer starts with a
    // sign) isn't picked up as a global name.
    for item in items.iter_mut() {
        match item {
            ScriptItem::Label(name) if direction(name).is_none() => {
                *name = format!("{script}-l-{name}");
            }
            ScriptItem::Op(op) => {
                if let Some(target) = op.label_target_mut() {
                    if direction(target).is_none() {
                        *target = format!("{script}-l-{target}");
                    }
                }
            }
            _ => {}
        }
    }

    let mut occurrences: HashMap<String, u32> = HashMap::new();
    for item in items.iter_mut() {
        rename_directional(item, script, Direction::Backward, &mut occurrences)?;
    }

    occurrences.clear();
    for item in items.iter_mut().rev() {
        rename_directional(item, script, Direction::Forward, &mut occurrences)?;
    }

    // Call targets become the entry labels the merge step will emit.
    for item in items.iter_mut() {
        if let ScriptItem::Op(Op::Call { target }) = item {
            *target = format!("sub-{target}");
        }
    }

    Ok(())
}

fn rename_directional(
    item: &mut ScriptItem,
    script: &str,
    dir: Direction,
    occurrences: &mut HashMap<String, u32>,
) -> Result<(), AssetError> {
    match item {
        ScriptItem::Label(name) if direction(name) == Some(dir) => {
            let count = occurrences.entry(name.clone()).or_insert(0);
            *name = format!("{script}-l-{name}-{count}");
            *count += 1;
        }
        ScriptItem::Op(op) => {
            if let Some(target) = op.label_target_mut() {
                if direction(target) == Some(dir) {
                    let index = occurrences
                        .get(target.as_str())
                        .and_then(|count| count.checked_sub(1))
                        .ok_or_else(|| {
                            AssetError::new(format!("unresolved label '{target}'"))
                        })?;
                    *target = format!("{script}-l-{target}-{index}");
                }
            }
        }
        _ => {}
    }
    Ok(())
}
