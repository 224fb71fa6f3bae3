//! JSON Schema (draft-04/06) abstract syntax.
//!
//! The compiler front end ingests a `serde_json::Value` into a [`Schema`]
//! and validates keyword shapes along the way. Keywords outside the
//! supported vocabulary are ignored, per the JSON Schema processing model;
//! `$ref` resolution and remote fetching are out of scope.

use serde_json::Value;

use crate::error::CompileError;

bitflags::bitflags! {
    /// Primitive types admitted by the `type` keyword.
    pub struct Types: u8 {
        /// `"object"`
        const OBJECT  = 1 << 0;
        /// `"array"`
        const ARRAY   = 1 << 1;
        /// `"string"`
        const STRING  = 1 << 2;
        /// `"number"`
        const NUMBER  = 1 << 3;
        /// `"integer"`: numbers with integer values.
        const INTEGER = 1 << 4;
        /// `"boolean"`
        const BOOLEAN = 1 << 5;
        /// `"null"`
        const NULL    = 1 << 6;
    }
}

/// A numeric bound from `minimum`/`maximum` and their exclusive variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    /// The bound value.
    pub value: f64,
    /// Whether the bound excludes `value` itself.
    pub exclusive: bool,
}

/// An `additionalProperties`/`additionalItems` specification.
#[derive(Debug, Clone, PartialEq)]
pub enum Additional {
    /// `true`/`false` form.
    Allowed(bool),
    /// Schema form.
    Schema(Box<Schema>),
}

/// The `items` keyword.
#[derive(Debug, Clone, PartialEq)]
pub enum Items {
    /// `items: <schema>`; every item validates against one schema.
    Uniform(Box<Schema>),
    /// `items: [<schema>, ...]`; positional schemas.
    Tuple(Vec<Schema>),
}

/// A parsed schema document.
///
/// `Default` is the empty schema, which accepts everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    /// The `false` schema: rejects every instance.
    pub never: bool,

    /// Allowed types; `None` leaves the type unconstrained.
    pub types: Option<Types>,

    /// Lower numeric bound.
    pub minimum: Option<Bound>,
    /// Upper numeric bound.
    pub maximum: Option<Bound>,
    /// `multipleOf` divisor.
    pub multiple_of: Option<f64>,

    /// `minLength`, in unicode code points per the standard; this
    /// implementation measures bytes, as the original does.
    pub min_length: Option<u64>,
    /// `maxLength`.
    pub max_length: Option<u64>,
    /// `pattern` source.
    pub pattern: Option<String>,

    /// `properties`, in document order.
    pub properties: Vec<(String, Schema)>,
    /// `patternProperties`, in document order.
    pub pattern_properties: Vec<(String, Schema)>,
    /// `required` property names.
    pub required: Vec<String>,
    /// Property dependencies: each key requires the listed names.
    pub dependencies: Vec<(String, Vec<String>)>,
    /// `additionalProperties`.
    pub additional_properties: Option<Additional>,
    /// `minProperties`.
    pub min_properties: Option<u64>,
    /// `maxProperties`.
    pub max_properties: Option<u64>,

    /// `items`.
    pub items: Option<Items>,
    /// `additionalItems` (meaningful with tuple `items`).
    pub additional_items: Option<Additional>,
    /// `minItems`.
    pub min_items: Option<u64>,
    /// `maxItems`.
    pub max_items: Option<u64>,
    /// `uniqueItems`.
    pub unique_items: bool,

    /// `allOf` branches.
    pub all_of: Vec<Schema>,
    /// `anyOf` branches.
    pub any_of: Vec<Schema>,
    /// `oneOf` branches.
    pub one_of: Vec<Schema>,
    /// `not` branch.
    pub not: Option<Box<Schema>>,
}

impl Schema {
    /// Parse a schema from a JSON document.
    ///
    /// Draft-06 boolean schemas are accepted: `true` is the empty schema,
    /// `false` rejects everything.
    pub fn from_value(doc: &Value) -> Result<Schema, CompileError> {
        match doc {
            Value::Bool(true) => Ok(Schema::default()),
            Value::Bool(false) => Ok(Schema {
                never: true,
                ..Schema::default()
            }),
            Value::Object(map) => Self::from_map(map),
            _ => Err(CompileError::Schema(
                "schema must be an object or boolean".into(),
            )),
        }
    }

    fn from_map(map: &serde_json::Map<String, Value>) -> Result<Schema, CompileError> {
        let mut schema = Schema::default();

        for (kw, v) in map {
            match kw.as_str() {
                "type" => schema.types = Some(parse_types(v)?),

                "minimum" => {
                    let value = number(kw, v)?;
                    schema.minimum = Some(Bound {
                        value,
                        exclusive: schema.minimum.map_or(false, |b| b.exclusive),
                    });
                }
                "maximum" => {
                    let value = number(kw, v)?;
                    schema.maximum = Some(Bound {
                        value,
                        exclusive: schema.maximum.map_or(false, |b| b.exclusive),
                    });
                }
                "exclusiveMinimum" => match v {
                    // draft-04 modifier form
                    Value::Bool(excl) => {
                        if let Some(b) = &mut schema.minimum {
                            b.exclusive = *excl;
                        } else if *excl {
                            schema.minimum = Some(Bound {
                                value: f64::NEG_INFINITY,
                                exclusive: true,
                            });
                        }
                    }
                    // draft-06 numeric form
                    _ => {
                        schema.minimum = Some(Bound {
                            value: number(kw, v)?,
                            exclusive: true,
                        })
                    }
                },
                "exclusiveMaximum" => match v {
                    Value::Bool(excl) => {
                        if let Some(b) = &mut schema.maximum {
                            b.exclusive = *excl;
                        } else if *excl {
                            schema.maximum = Some(Bound {
                                value: f64::INFINITY,
                                exclusive: true,
                            });
                        }
                    }
                    _ => {
                        schema.maximum = Some(Bound {
                            value: number(kw, v)?,
                            exclusive: true,
                        })
                    }
                },
                "multipleOf" => {
                    let d = number(kw, v)?;
                    if d <= 0.0 {
                        return Err(CompileError::Schema("multipleOf must be positive".into()));
                    }
                    schema.multiple_of = Some(d);
                }

                "minLength" => schema.min_length = Some(size(kw, v)?),
                "maxLength" => schema.max_length = Some(size(kw, v)?),
                "pattern" => schema.pattern = Some(string(kw, v)?),

                "properties" => {
                    let obj = object(kw, v)?;
                    for (name, sub) in obj {
                        schema.properties.push((name.clone(), Schema::from_value(sub)?));
                    }
                }
                "patternProperties" => {
                    let obj = object(kw, v)?;
                    for (pat, sub) in obj {
                        schema
                            .pattern_properties
                            .push((pat.clone(), Schema::from_value(sub)?));
                    }
                }
                "required" => {
                    for name in array(kw, v)? {
                        schema.required.push(string(kw, name)?);
                    }
                }
                "dependencies" => {
                    let obj = object(kw, v)?;
                    for (name, dep) in obj {
                        match dep {
                            Value::Array(names) => {
                                let mut requires = Vec::with_capacity(names.len());
                                for n in names {
                                    requires.push(string(kw, n)?);
                                }
                                schema.dependencies.push((name.clone(), requires));
                            }
                            _ => {
                                return Err(CompileError::Unsupported(
                                    "schema-form dependencies",
                                ))
                            }
                        }
                    }
                }
                "additionalProperties" => {
                    schema.additional_properties = Some(additional(v)?);
                }
                "minProperties" => schema.min_properties = Some(size(kw, v)?),
                "maxProperties" => schema.max_properties = Some(size(kw, v)?),

                "items" => match v {
                    Value::Array(subs) => {
                        let mut tuple = Vec::with_capacity(subs.len());
                        for sub in subs {
                            tuple.push(Schema::from_value(sub)?);
                        }
                        schema.items = Some(Items::Tuple(tuple));
                    }
                    _ => {
                        schema.items = Some(Items::Uniform(Box::new(Schema::from_value(v)?)));
                    }
                },
                "additionalItems" => schema.additional_items = Some(additional(v)?),
                "minItems" => schema.min_items = Some(size(kw, v)?),
                "maxItems" => schema.max_items = Some(size(kw, v)?),
                "uniqueItems" => {
                    schema.unique_items = matches!(v, Value::Bool(true));
                }

                "allOf" => schema.all_of = subschemas(kw, v)?,
                "anyOf" => schema.any_of = subschemas(kw, v)?,
                "oneOf" => schema.one_of = subschemas(kw, v)?,
                "not" => schema.not = Some(Box::new(Schema::from_value(v)?)),

                // unknown keywords (annotations, $schema, title, …) are
                // ignored per the processing model
                _ => {}
            }
        }

        Ok(schema)
    }
}

fn parse_types(v: &Value) -> Result<Types, CompileError> {
    fn one(name: &str) -> Result<Types, CompileError> {
        match name {
            "object" => Ok(Types::OBJECT),
            "array" => Ok(Types::ARRAY),
            "string" => Ok(Types::STRING),
            "number" => Ok(Types::NUMBER),
            "integer" => Ok(Types::INTEGER),
            "boolean" => Ok(Types::BOOLEAN),
            "null" => Ok(Types::NULL),
            other => Err(CompileError::Schema(format!("unknown type {other:?}"))),
        }
    }

    match v {
        Value::String(s) => one(s),
        Value::Array(names) => {
            let mut types = Types::empty();
            for n in names {
                match n {
                    Value::String(s) => types |= one(s)?,
                    _ => return Err(CompileError::Schema("type entries must be strings".into())),
                }
            }
            if types.is_empty() {
                return Err(CompileError::Schema("type array must not be empty".into()));
            }
            Ok(types)
        }
        _ => Err(CompileError::Schema(
            "type must be a string or array of strings".into(),
        )),
    }
}

fn additional(v: &Value) -> Result<Additional, CompileError> {
    match v {
        Value::Bool(allowed) => Ok(Additional::Allowed(*allowed)),
        _ => Ok(Additional::Schema(Box::new(Schema::from_value(v)?))),
    }
}

fn subschemas(kw: &str, v: &Value) -> Result<Vec<Schema>, CompileError> {
    let subs = array(kw, v)?;
    if subs.is_empty() {
        return Err(CompileError::Schema(format!("{kw} must not be empty")));
    }

    subs.iter().map(Schema::from_value).collect()
}

fn number(kw: &str, v: &Value) -> Result<f64, CompileError> {
    v.as_f64()
        .ok_or_else(|| CompileError::Schema(format!("{kw} must be a number")))
}

fn size(kw: &str, v: &Value) -> Result<u64, CompileError> {
    v.as_u64()
        .ok_or_else(|| CompileError::Schema(format!("{kw} must be a non-negative integer")))
}

fn string(kw: &str, v: &Value) -> Result<String, CompileError> {
    v.as_str()
        .map(str::to_owned)
        .ok_or_else(|| CompileError::Schema(format!("{kw} must be a string")))
}

fn object<'v>(
    kw: &str,
    v: &'v Value,
) -> Result<&'v serde_json::Map<String, Value>, CompileError> {
    v.as_object()
        .ok_or_else(|| CompileError::Schema(format!("{kw} must be an object")))
}

fn array<'v>(kw: &str, v: &'v Value) -> Result<&'v [Value], CompileError> {
    v.as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| CompileError::Schema(format!("{kw} must be an array")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_the_empty_schema() {
        let s = Schema::from_value(&json!({})).unwrap();
        assert_eq!(s, Schema::default());
    }

    #[test]
    fn boolean_schemas() {
        assert!(!Schema::from_value(&json!(true)).unwrap().never);
        assert!(Schema::from_value(&json!(false)).unwrap().never);
    }

    #[test]
    fn draft04_exclusive_minimum_modifier() {
        let s = Schema::from_value(&json!({"minimum": 2.0, "exclusiveMinimum": true})).unwrap();
        assert_eq!(
            s.minimum,
            Some(Bound {
                value: 2.0,
                exclusive: true
            })
        );
    }

    #[test]
    fn draft06_exclusive_minimum_number() {
        let s = Schema::from_value(&json!({"exclusiveMinimum": 2.0})).unwrap();
        assert_eq!(
            s.minimum,
            Some(Bound {
                value: 2.0,
                exclusive: true
            })
        );
    }

    #[test]
    fn tuple_and_uniform_items() {
        let s = Schema::from_value(&json!({"items": {"type": "number"}})).unwrap();
        assert!(matches!(s.items, Some(Items::Uniform(_))));

        let s = Schema::from_value(&json!({"items": [{}, {"type": "string"}]})).unwrap();
        match s.items {
            Some(Items::Tuple(t)) => assert_eq!(t.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_keywords() {
        assert!(Schema::from_value(&json!({"type": 3})).is_err());
        assert!(Schema::from_value(&json!({"minLength": -1})).is_err());
        assert!(Schema::from_value(&json!({"multipleOf": 0})).is_err());
        assert!(Schema::from_value(&json!({"allOf": []})).is_err());
        assert!(Schema::from_value(&json!({"dependencies": {"a": {"type": "string"}}})).is_err());
    }
}
