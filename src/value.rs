use std::fmt::{self, Display};

use crate::codec::TypedValue;
use crate::error::AssetError;

/// The four kinds of declarable assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Project,
    Node,
    NodeList,
    Sequence,
}

impl Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssetKind::Project => "project",
            AssetKind::Node => "node",
            AssetKind::NodeList => "node-list",
            AssetKind::Sequence => "sequence",
        })
    }
}

/// A raw declaration value, as produced by evaluating a declaration file.
///
/// This is the dynamically shaped data handed over by the embedded
/// interpreter; refinement turns it into [`RefinedValue`]s or compiled
/// assets. Integers are kept as `i128` so that the full `u64` and `i64`
/// ranges survive until they are checked against a concrete width.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i128),
    Float(f64),
    Bool(bool),
    Str(String),
    Sym(String),
    List(Vec<Value>),
}

impl Value {
    pub fn sym(s: impl Into<String>) -> Self {
        Value::Sym(s.into())
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Sym(_) => "symbol",
            Value::List(_) => "list",
        }
    }

    pub(crate) fn as_sym(&self) -> Result<&str, AssetError> {
        match self {
            Value::Sym(s) => Ok(s),
            other => Err(AssetError::new(format!(
                "expected a symbol, got {}",
                other.kind_name()
            ))),
        }
    }

    pub(crate) fn as_list(&self) -> Result<&[Value], AssetError> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(AssetError::new(format!(
                "expected a list, got {}",
                other.kind_name()
            ))),
        }
    }
}

/// Looks up `key` in an association list of `(key item…)` entries,
/// returning the entry's tail.
pub(crate) fn assoc<'a>(items: &'a [Value], key: &str) -> Result<Option<&'a [Value]>, AssetError> {
    for entry in items {
        let entry = entry.as_list()?;
        let Some((head, tail)) = entry.split_first() else {
            return Err(AssetError::new("empty entry in association list"));
        };
        if head.as_sym()? == key {
            return Ok(Some(tail));
        }
    }
    Ok(None)
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// The closed set of value types. `Node(None)` is the wildcard node type,
/// matching an instance of any declared node.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    String,
    Vec(Box<Type>),
    Tuple(Vec<Type>),
    Project,
    Node(Option<String>),
    NodeList,
    Sequence,
}

pub(crate) const MAX_TUPLE_ARITY: usize = 8;

impl Type {
    pub fn is_unsigned_int(&self) -> bool {
        matches!(self, Type::U8 | Type::U16 | Type::U32 | Type::U64)
    }

    pub fn is_signed_int(&self) -> bool {
        matches!(self, Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_unsigned_int() || self.is_signed_int() || matches!(self, Type::F32 | Type::F64)
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::U8 => f.write_str("u8"),
            Type::U16 => f.write_str("u16"),
            Type::U32 => f.write_str("u32"),
            Type::U64 => f.write_str("u64"),
            Type::I8 => f.write_str("i8"),
            Type::I16 => f.write_str("i16"),
            Type::I32 => f.write_str("i32"),
            Type::I64 => f.write_str("i64"),
            Type::F32 => f.write_str("f32"),
            Type::F64 => f.write_str("f64"),
            Type::Bool => f.write_str("bool"),
            Type::String => f.write_str("string"),
            Type::Vec(item) => write!(f, "(vec {item})"),
            Type::Tuple(items) => {
                f.write_str("(tuple")?;
                for item in items {
                    write!(f, " {item}")?;
                }
                f.write_str(")")
            }
            Type::Project => f.write_str("project"),
            Type::Node(Some(name)) => write!(f, "(node {name})"),
            Type::Node(None) => f.write_str("(node *)"),
            Type::NodeList => f.write_str("node-list"),
            Type::Sequence => f.write_str("sequence"),
        }
    }
}

/// Parses a type expression from its raw declaration form.
pub fn parse_type(value: &Value) -> Result<Type, AssetError> {
    match value {
        Value::Sym(s) => match s.as_str() {
            "u8" => Ok(Type::U8),
            "u16" => Ok(Type::U16),
            "u32" => Ok(Type::U32),
            "u64" => Ok(Type::U64),
            "i8" => Ok(Type::I8),
            "i16" => Ok(Type::I16),
            "i32" => Ok(Type::I32),
            "i64" => Ok(Type::I64),
            "f32" => Ok(Type::F32),
            "f64" => Ok(Type::F64),
            "bool" => Ok(Type::Bool),
            "string" => Ok(Type::String),
            "project" => Ok(Type::Project),
            "node-list" => Ok(Type::NodeList),
            "sequence" => Ok(Type::Sequence),
            other => Err(AssetError::new(format!("unknown type '{other}'"))),
        },
        Value::List(items) => {
            let Some((head, args)) = items.split_first() else {
                return Err(AssetError::new("empty type expression"));
            };
            match head.as_sym()? {
                "vec" => match args {
                    [item] => Ok(Type::Vec(Box::new(parse_type(item)?))),
                    _ => Err(AssetError::new("vec takes exactly one item type")),
                },
                "tuple" => {
                    if args.is_empty() || args.len() > MAX_TUPLE_ARITY {
                        return Err(AssetError::new(format!(
                            "tuple arity must be between 1 and {MAX_TUPLE_ARITY}, got {}",
                            args.len()
                        )));
                    }
                    let items = args.iter().map(parse_type).collect::<Result<_, _>>()?;
                    Ok(Type::Tuple(items))
                }
                "node" => match args {
                    [name] => match name.as_sym()? {
                        "*" => Ok(Type::Node(None)),
                        name => Ok(Type::Node(Some(name.to_owned()))),
                    },
                    _ => Err(AssetError::new("node takes exactly one target name")),
                },
                other => Err(AssetError::new(format!("unknown type constructor '{other}'"))),
            }
        }
        other => Err(AssetError::new(format!(
            "expected a type expression, got {}",
            other.kind_name()
        ))),
    }
}

/// A named, typed parameter or property of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub ty: Type,
}

/// The refined declaration of a node type.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub name: String,
    pub parameters: Vec<Variable>,
    pub properties: Vec<Variable>,
}

impl NodeSpec {
    pub fn property(&self, name: &str) -> Option<&Variable> {
        self.properties.iter().find(|v| v.name == name)
    }
}

/// Access to node declarations during refinement. Resolving a node may
/// trigger evaluation and caching of that node's own asset, hence `&mut`.
pub trait NodeResolver {
    fn node_spec(&mut self, name: &str) -> Result<NodeSpec, AssetError>;

    fn asset_exists(&mut self, kind: AssetKind, name: &str) -> Result<bool, AssetError>;
}

/// Checks that a type is structurally well-formed and that every node type
/// it mentions refers to a declared node asset.
pub fn validate_type(ty: &Type, res: &mut dyn NodeResolver) -> Result<(), AssetError> {
    match ty {
        Type::Vec(item) => validate_type(item, res),
        Type::Tuple(items) => {
            if items.is_empty() || items.len() > MAX_TUPLE_ARITY {
                return Err(AssetError::new(format!(
                    "tuple arity must be between 1 and {MAX_TUPLE_ARITY}, got {}",
                    items.len()
                )));
            }
            items.iter().try_for_each(|item| validate_type(item, res))
        }
        Type::Node(Some(name)) => {
            if res.asset_exists(AssetKind::Node, name)? {
                Ok(())
            } else {
                Err(AssetError::new(format!("unknown node '{name}'")))
            }
        }
        _ => Ok(()),
    }
}

/// A validated, type-annotated value. References to node lists and
/// sequences keep the referenced asset's name; the wire id is computed from
/// the live registry only when a response is encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum RefinedValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    Vec(Vec<RefinedValue>),
    Tuple(Vec<RefinedValue>),
    Node {
        name: String,
        args: Vec<(Type, RefinedValue)>,
    },
    NodeList(String),
    Sequence(String),
}

fn expected(what: &str, got: &Value, ty: &Type) -> AssetError {
    AssetError::new(format!(
        "expected {what} for type {ty}, got {}",
        got.kind_name()
    ))
}

fn refine_int<T: TryFrom<i128>>(value: &Value, ty: &Type) -> Result<T, AssetError> {
    match value {
        Value::Int(n) => T::try_from(*n)
            .map_err(|_| AssetError::new(format!("value {n} is out of range for {ty}"))),
        other => Err(expected("an exact integer", other, ty)),
    }
}

fn refine_float(value: &Value, ty: &Type) -> Result<f64, AssetError> {
    match value {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(x) => Ok(*x),
        other => Err(expected("a number", other, ty)),
    }
}

/// Checks a raw value against a type without keeping the refined result.
pub fn check_value(value: &Value, ty: &Type, res: &mut dyn NodeResolver) -> Result<(), AssetError> {
    refine_value(value, ty, res).map(|_| ())
}

/// Checks a raw value against a type and transforms it into its canonical,
/// type-annotated form.
pub fn refine_value(
    value: &Value,
    ty: &Type,
    res: &mut dyn NodeResolver,
) -> Result<RefinedValue, AssetError> {
    match ty {
        Type::U8 => Ok(RefinedValue::U8(refine_int(value, ty)?)),
        Type::U16 => Ok(RefinedValue::U16(refine_int(value, ty)?)),
        Type::U32 => Ok(RefinedValue::U32(refine_int(value, ty)?)),
        Type::U64 => Ok(RefinedValue::U64(refine_int(value, ty)?)),
        Type::I8 => Ok(RefinedValue::I8(refine_int(value, ty)?)),
        Type::I16 => Ok(RefinedValue::I16(refine_int(value, ty)?)),
        Type::I32 => Ok(RefinedValue::I32(refine_int(value, ty)?)),
        Type::I64 => Ok(RefinedValue::I64(refine_int(value, ty)?)),
        Type::F32 => Ok(RefinedValue::F32(refine_float(value, ty)? as f32)),
        Type::F64 => Ok(RefinedValue::F64(refine_float(value, ty)?)),
        Type::Bool => match value {
            Value::Bool(b) => Ok(RefinedValue::Bool(*b)),
            other => Err(expected("a bool", other, ty)),
        },
        Type::String => match value {
            Value::Str(s) => Ok(RefinedValue::String(s.clone())),
            other => Err(expected("a string", other, ty)),
        },
        Type::Vec(item_ty) => {
            let items = value.as_list()?;
            let refined = items
                .iter()
                .map(|item| refine_value(item, item_ty, res))
                .collect::<Result<_, _>>()?;
            Ok(RefinedValue::Vec(refined))
        }
        Type::Tuple(item_tys) => {
            let items = value.as_list()?;
            if items.len() != item_tys.len() {
                return Err(AssetError::new(format!(
                    "expected {} elements for type {ty}, got {}",
                    item_tys.len(),
                    items.len()
                )));
            }
            let refined = items
                .iter()
                .zip(item_tys)
                .map(|(item, item_ty)| refine_value(item, item_ty, res))
                .collect::<Result<_, _>>()?;
            Ok(RefinedValue::Tuple(refined))
        }
        Type::Project => Err(AssetError::new("project-typed values are not supported")),
        Type::Node(target) => {
            let items = value.as_list()?;
            let Some((head, args)) = items.split_first() else {
                return Err(AssetError::new("node instance must name a node"));
            };
            let name = head.as_sym()?;
            if let Some(target) = target {
                if name != target {
                    return Err(AssetError::new(format!(
                        "expected an instance of node '{target}', got '{name}'"
                    )));
                }
            }
            let spec = res.node_spec(name)?;
            if args.len() != spec.parameters.len() {
                return Err(AssetError::new(format!(
                    "node '{name}' takes {} arguments, got {}",
                    spec.parameters.len(),
                    args.len()
                )));
            }
            let args = args
                .iter()
                .zip(&spec.parameters)
                .map(|(arg, param)| Ok((param.ty.clone(), refine_value(arg, &param.ty, res)?)))
                .collect::<Result<_, AssetError>>()?;
            Ok(RefinedValue::Node {
                name: name.to_owned(),
                args,
            })
        }
        Type::NodeList => Ok(RefinedValue::NodeList(
            refine_reference(value, AssetKind::NodeList, res)?,
        )),
        Type::Sequence => Ok(RefinedValue::Sequence(
            refine_reference(value, AssetKind::Sequence, res)?,
        )),
    }
}

fn refine_reference(
    value: &Value,
    kind: AssetKind,
    res: &mut dyn NodeResolver,
) -> Result<String, AssetError> {
    let name = value.as_sym()?;
    if res.asset_exists(kind, name)? {
        Ok(name.to_owned())
    } else {
        Err(AssetError::new(format!("unknown {kind} '{name}'")))
    }
}

impl RefinedValue {
    /// Lowers into the wire representation, resolving asset references into
    /// their current ids.
    pub fn lower(
        &self,
        ids: &mut dyn FnMut(AssetKind, &str) -> Option<u32>,
    ) -> Result<TypedValue, AssetError> {
        Ok(match self {
            RefinedValue::U8(v) => TypedValue::U8(*v),
            RefinedValue::U16(v) => TypedValue::U16(*v),
            RefinedValue::U32(v) => TypedValue::U32(*v),
            RefinedValue::U64(v) => TypedValue::U64(*v),
            RefinedValue::I8(v) => TypedValue::I8(*v),
            RefinedValue::I16(v) => TypedValue::I16(*v),
            RefinedValue::I32(v) => TypedValue::I32(*v),
            RefinedValue::I64(v) => TypedValue::I64(*v),
            RefinedValue::F32(v) => TypedValue::F32(*v),
            RefinedValue::F64(v) => TypedValue::F64(*v),
            RefinedValue::Bool(v) => TypedValue::Bool(*v),
            RefinedValue::String(v) => TypedValue::String(v.clone()),
            RefinedValue::Vec(items) => TypedValue::Vec(
                items
                    .iter()
                    .map(|item| item.lower(ids))
                    .collect::<Result<_, _>>()?,
            ),
            RefinedValue::Tuple(items) => TypedValue::Tuple(
                items
                    .iter()
                    .map(|item| item.lower(ids))
                    .collect::<Result<_, _>>()?,
            ),
            RefinedValue::Node { args, .. } => TypedValue::Node(
                args.iter()
                    .map(|(ty, arg)| Ok((ty.clone(), arg.lower(ids)?)))
                    .collect::<Result<_, AssetError>>()?,
            ),
            RefinedValue::NodeList(name) => {
                TypedValue::NodeList(resolve_id(ids, AssetKind::NodeList, name)?)
            }
            RefinedValue::Sequence(name) => {
                TypedValue::Sequence(resolve_id(ids, AssetKind::Sequence, name)?)
            }
        })
    }
}

fn resolve_id(
    ids: &mut dyn FnMut(AssetKind, &str) -> Option<u32>,
    kind: AssetKind,
    name: &str,
) -> Result<u32, AssetError> {
    ids(kind, name).ok_or_else(|| AssetError::new(format!("unknown {kind} '{name}'")))
}

/// The refined project manifest: the project's name and the glob patterns
/// its asset files are discovered with.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectDecl {
    pub name: String,
    pub patterns: Vec<String>,
}

/// Refines a project declaration. `default_ext` is the root declaration
/// file's extension; when the manifest doesn't name any glob patterns, the
/// default matches every file of that type under the project root.
pub fn refine_project(value: &Value, default_ext: &str) -> Result<ProjectDecl, AssetError> {
    let entries = value.as_list()?;

    let name = match assoc(entries, "name")? {
        Some([name]) => name.as_sym()?.to_owned(),
        Some(_) => return Err(AssetError::new("project name must be a single symbol")),
        None => return Err(AssetError::new("project declaration is missing a name")),
    };
    if !is_identifier(&name) {
        return Err(AssetError::new(format!(
            "project name '{name}' is not a valid identifier"
        )));
    }

    let patterns = match assoc(entries, "assets")? {
        Some(patterns) => patterns
            .iter()
            .map(|p| match p {
                Value::Str(s) => Ok(s.clone()),
                other => Err(AssetError::new(format!(
                    "glob pattern must be a string, got {}",
                    other.kind_name()
                ))),
            })
            .collect::<Result<_, _>>()?,
        None if default_ext.is_empty() => vec!["**/*".to_owned()],
        None => vec![format!("**/*.{default_ext}")],
    };

    Ok(ProjectDecl { name, patterns })
}

/// Refines a node declaration into its parameter and property lists.
pub fn refine_node_asset(
    name: &str,
    value: &Value,
    res: &mut dyn NodeResolver,
) -> Result<NodeSpec, AssetError> {
    let entries = value.as_list()?;
    let parameters = refine_variables(assoc(entries, "parameters")?.unwrap_or(&[]), res)?;
    let properties = refine_variables(assoc(entries, "properties")?.unwrap_or(&[]), res)?;
    Ok(NodeSpec {
        name: name.to_owned(),
        parameters,
        properties,
    })
}

fn refine_variables(
    entries: &[Value],
    res: &mut dyn NodeResolver,
) -> Result<Vec<Variable>, AssetError> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let [name, ty] = entry.as_list()? else {
            return Err(AssetError::new(
                "variable declaration must be a (name type) pair",
            ));
        };
        let name = name.as_sym()?;
        if !is_identifier(name) {
            return Err(AssetError::new(format!(
                "variable name '{name}' is not a valid identifier"
            )));
        }
        if out.iter().any(|v: &Variable| v.name == name) {
            return Err(AssetError::new(format!("duplicate variable name '{name}'")));
        }
        let ty = parse_type(ty)?;
        validate_type(&ty, res)?;
        out.push(Variable {
            name: name.to_owned(),
            ty,
        });
    }
    Ok(out)
}

/// A single refined entry of a node list.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInstance {
    pub node: String,
    pub args: Vec<(Type, RefinedValue)>,
}

/// Refines a node list: every entry is checked as an instance of the
/// wildcard node type.
pub fn refine_node_list(
    value: &Value,
    res: &mut dyn NodeResolver,
) -> Result<Vec<NodeInstance>, AssetError> {
    value
        .as_list()?
        .iter()
        .map(|entry| match refine_value(entry, &Type::Node(None), res)? {
            RefinedValue::Node { name, args } => Ok(NodeInstance { node: name, args }),
            _ => unreachable!("refining against a node type yields a node value"),
        })
        .collect()
}

/// In-memory resolver used by unit tests across the crate.
#[cfg(test)]
pub(crate) struct FakeResolver {
    pub(crate) nodes: Vec<NodeSpec>,
    pub(crate) node_lists: Vec<String>,
    pub(crate) sequences: Vec<String>,
}

#[cfg(test)]
impl FakeResolver {
    pub(crate) fn with_nodes(nodes: Vec<NodeSpec>) -> Self {
        Self {
            nodes,
            node_lists: Vec::new(),
            sequences: Vec::new(),
        }
    }
}

#[cfg(test)]
impl NodeResolver for FakeResolver {
    fn node_spec(&mut self, name: &str) -> Result<NodeSpec, AssetError> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| AssetError::new(format!("unknown node '{name}'")))
    }

    fn asset_exists(&mut self, kind: AssetKind, name: &str) -> Result<bool, AssetError> {
        Ok(match kind {
            AssetKind::Node => self.nodes.iter().any(|n| n.name == name),
            AssetKind::NodeList => self.node_lists.iter().any(|n| n == name),
            AssetKind::Sequence => self.sequences.iter().any(|n| n == name),
            AssetKind::Project => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sprite_node() -> NodeSpec {
        NodeSpec {
            name: "sprite".to_owned(),
            parameters: vec![
                Variable {
                    name: "x".to_owned(),
                    ty: Type::U8,
                },
                Variable {
                    name: "label".to_owned(),
                    ty: Type::String,
                },
            ],
            properties: vec![Variable {
                name: "visible".to_owned(),
                ty: Type::Bool,
            }],
        }
    }

    #[test]
    fn integer_widths_are_range_checked() {
        let mut res = FakeResolver::with_nodes(vec![]);
        assert!(refine_value(&Value::Int(255), &Type::U8, &mut res).is_ok());
        assert!(refine_value(&Value::Int(256), &Type::U8, &mut res).is_err());
        assert!(refine_value(&Value::Int(-32768), &Type::I16, &mut res).is_ok());
        assert!(refine_value(&Value::Int(-32769), &Type::I16, &mut res).is_err());
        assert!(refine_value(&Value::Int(u64::MAX as i128), &Type::U64, &mut res).is_ok());
        assert!(refine_value(&Value::Int(-1), &Type::U64, &mut res).is_err());
    }

    #[test]
    fn floats_accept_any_real_number() {
        let mut res = FakeResolver::with_nodes(vec![]);
        assert_eq!(
            refine_value(&Value::Int(3), &Type::F32, &mut res).unwrap(),
            RefinedValue::F32(3.0)
        );
        assert_eq!(
            refine_value(&Value::Float(-0.5), &Type::F64, &mut res).unwrap(),
            RefinedValue::F64(-0.5)
        );
        assert!(refine_value(&Value::str("x"), &Type::F32, &mut res).is_err());
    }

    #[test]
    fn exactness_is_enforced() {
        let mut res = FakeResolver::with_nodes(vec![]);
        assert!(refine_value(&Value::Float(5.0), &Type::U8, &mut res).is_err());
    }

    #[test]
    fn tuple_checks_arity_elementwise() {
        let mut res = FakeResolver::with_nodes(vec![]);
        let ty = Type::Tuple(vec![Type::String, Type::U8]);
        let ok = Value::list([Value::str("a"), Value::Int(5)]);
        assert_eq!(
            refine_value(&ok, &ty, &mut res).unwrap(),
            RefinedValue::Tuple(vec![
                RefinedValue::String("a".to_owned()),
                RefinedValue::U8(5)
            ])
        );
        let short = Value::list([Value::str("a")]);
        assert!(refine_value(&short, &ty, &mut res).is_err());
    }

    #[test]
    fn vector_requires_uniform_elements() {
        let mut res = FakeResolver::with_nodes(vec![]);
        let ty = Type::Vec(Box::new(Type::I16));
        let ok = Value::list([Value::Int(1), Value::Int(2)]);
        assert!(refine_value(&ok, &ty, &mut res).is_ok());
        let bad = Value::list([Value::Int(1), Value::str("x")]);
        assert!(refine_value(&bad, &ty, &mut res).is_err());
    }

    #[test]
    fn node_instance_pairs_arguments_with_parameter_types() {
        let mut res = FakeResolver::with_nodes(vec![sprite_node()]);
        let instance = Value::list([Value::sym("sprite"), Value::Int(7), Value::str("hero")]);

        let refined = refine_value(&instance, &Type::Node(None), &mut res).unwrap();
        assert_eq!(
            refined,
            RefinedValue::Node {
                name: "sprite".to_owned(),
                args: vec![
                    (Type::U8, RefinedValue::U8(7)),
                    (Type::String, RefinedValue::String("hero".to_owned())),
                ],
            }
        );

        // Wrong target name, wrong arity.
        assert!(
            refine_value(&instance, &Type::Node(Some("other".to_owned())), &mut res).is_err()
        );
        let short = Value::list([Value::sym("sprite"), Value::Int(7)]);
        assert!(refine_value(&short, &Type::Node(None), &mut res).is_err());
    }

    #[test]
    fn references_must_name_existing_assets() {
        let mut res = FakeResolver::with_nodes(vec![]);
        res.sequences.push("intro".to_owned());
        assert_eq!(
            refine_value(&Value::sym("intro"), &Type::Sequence, &mut res).unwrap(),
            RefinedValue::Sequence("intro".to_owned())
        );
        assert!(refine_value(&Value::sym("outro"), &Type::Sequence, &mut res).is_err());
        assert!(refine_value(&Value::sym("intro"), &Type::NodeList, &mut res).is_err());
    }

    #[test]
    fn validate_type_resolves_node_names() {
        let mut res = FakeResolver::with_nodes(vec![sprite_node()]);
        assert!(validate_type(&Type::Node(Some("sprite".to_owned())), &mut res).is_ok());
        assert!(validate_type(&Type::Node(Some("ghost".to_owned())), &mut res).is_err());
        assert!(validate_type(&Type::Node(None), &mut res).is_ok());

        let nested = Type::Vec(Box::new(Type::Node(Some("ghost".to_owned()))));
        assert!(validate_type(&nested, &mut res).is_err());
    }

    #[test]
    fn parse_type_handles_compound_expressions() {
        let ty = parse_type(&Value::list([
            Value::sym("vec"),
            Value::list([Value::sym("tuple"), Value::sym("string"), Value::sym("u8")]),
        ]))
        .unwrap();
        assert_eq!(
            ty,
            Type::Vec(Box::new(Type::Tuple(vec![Type::String, Type::U8])))
        );

        assert_eq!(
            parse_type(&Value::list([Value::sym("node"), Value::sym("*")])).unwrap(),
            Type::Node(None)
        );
        assert!(parse_type(&Value::sym("u128")).is_err());

        let too_wide = Value::list(
            std::iter::once(Value::sym("tuple")).chain((0..9).map(|_| Value::sym("u8"))),
        );
        assert!(parse_type(&too_wide).is_err());
    }

    #[test]
    fn project_refinement_defaults_the_glob_set() {
        let decl = Value::list([Value::list([Value::sym("name"), Value::sym("demo")])]);
        let project = refine_project(&decl, "rkt").unwrap();
        assert_eq!(project.name, "demo");
        assert_eq!(project.patterns, vec!["**/*.rkt".to_owned()]);

        let explicit = Value::list([
            Value::list([Value::sym("name"), Value::sym("demo")]),
            Value::list([Value::sym("assets"), Value::str("nodes/*.rkt")]),
        ]);
        let project = refine_project(&explicit, "rkt").unwrap();
        assert_eq!(project.patterns, vec!["nodes/*.rkt".to_owned()]);

        let unnamed = Value::list([]);
        assert!(refine_project(&unnamed, "rkt").is_err());
    }

    #[test]
    fn node_refinement_rejects_duplicate_variables() {
        let mut res = FakeResolver::with_nodes(vec![]);
        let decl = Value::list([Value::list([
            Value::sym("properties"),
            Value::list([Value::sym("hp"), Value::sym("u16")]),
            Value::list([Value::sym("hp"), Value::sym("u8")]),
        ])]);
        assert!(refine_node_asset("enemy", &decl, &mut res).is_err());
    }

    #[test]
    fn node_list_refinement_accepts_any_declared_node() {
        let mut res = FakeResolver::with_nodes(vec![sprite_node()]);
        let decl = Value::list([
            Value::list([Value::sym("sprite"), Value::Int(1), Value::str("a")]),
            Value::list([Value::sym("sprite"), Value::Int(2), Value::str("b")]),
        ]);
        let instances = refine_node_list(&decl, &mut res).unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[1].node, "sprite");
        assert_eq!(instances[1].args[0].1, RefinedValue::U8(2));

        let unknown = Value::list([Value::list([Value::sym("ghost")])]);
        assert!(refine_node_list(&unknown, &mut res).is_err());
    }
}
