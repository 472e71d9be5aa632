//! Pipeline definition types.
//!
//! These types represent the user-authored pipeline YAML configuration
//! and the matrix variant assignments derived from it.

use crate::Result;
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::Schema;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Terminal deploy-class job whose gate decides the run verdict.
    #[serde(default)]
    pub gate: Option<String>,
    pub jobs: Vec<JobSpec>,
}

impl PipelineDefinition {
    /// Parse a pipeline from YAML.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Look up a job by name.
    pub fn job(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.iter().find(|job| job.name == name)
    }
}

/// Declarative description of one pipeline job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct JobSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Predicate over the triggering event, e.g. `event.kind == 'release'`.
    #[serde(rename = "if", default)]
    pub condition: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub needs: Vec<String>,
    #[serde(default)]
    pub matrix: Option<MatrixAxes>,
    #[serde(default)]
    pub produces: Vec<String>,
    #[serde(default)]
    pub consumes: Vec<String>,
    /// Shell command handed to the job runner.
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub secrets: Vec<SecretReference>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn needs(mut self, dependencies: &[&str]) -> Self {
        self.needs = dependencies.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn axis(mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.matrix
            .get_or_insert_with(MatrixAxes::default)
            .push(MatrixAxis {
                name: name.into(),
                values,
            });
        self
    }

    pub fn produces(mut self, keys: &[&str]) -> Self {
        self.produces = keys.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn consumes(mut self, keys: &[&str]) -> Self {
        self.consumes = keys.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn run(mut self, command: impl Into<String>) -> Self {
        self.run = Some(command.into());
        self
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(name) => vec![name],
        OneOrMany::Many(names) => names,
    })
}

/// One named matrix axis.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixAxis {
    pub name: String,
    pub values: Vec<serde_json::Value>,
}

/// Matrix axes in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixAxes(Vec<MatrixAxis>);

impl MatrixAxes {
    pub fn new(axes: Vec<MatrixAxis>) -> Self {
        Self(axes)
    }

    pub fn push(&mut self, axis: MatrixAxis) {
        self.0.push(axis);
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatrixAxis> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for MatrixAxes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for axis in &self.0 {
            map.serialize_entry(&axis.name, &axis.values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MatrixAxes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let pairs = deserializer.deserialize_map(OrderedMapVisitor::<Vec<serde_json::Value>>::new(
            "a map of matrix axis names to value lists",
        ))?;
        Ok(Self(
            pairs
                .into_iter()
                .map(|(name, values)| MatrixAxis { name, values })
                .collect(),
        ))
    }
}

impl JsonSchema for MatrixAxes {
    fn schema_name() -> String {
        "MatrixAxes".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        <HashMap<String, Vec<serde_json::Value>>>::json_schema(generator)
    }
}

/// Collects a map into key/value pairs, keeping document order and
/// rejecting repeated keys.
struct OrderedMapVisitor<V> {
    expecting: &'static str,
    marker: PhantomData<V>,
}

impl<V> OrderedMapVisitor<V> {
    fn new(expecting: &'static str) -> Self {
        Self {
            expecting,
            marker: PhantomData,
        }
    }
}

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = Vec<(String, V)>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.expecting)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
        let mut pairs: Vec<(String, V)> = Vec::new();
        while let Some((key, value)) = map.next_entry::<String, V>()? {
            if pairs.iter().any(|(existing, _)| *existing == key) {
                return Err(de::Error::custom(format!("duplicate key '{}'", key)));
            }
            pairs.push((key, value));
        }
        Ok(pairs)
    }
}

/// One matrix variant: an ordered assignment of axis name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Variant(Vec<(String, VariantValue)>);

/// Scalar matrix value, kept in its rendered form.
pub type VariantValue = String;

impl Variant {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, axis: impl Into<String>, value: &serde_json::Value) -> Self {
        self.0.push((axis.into(), render_value(value)));
        self
    }

    pub fn get(&self, axis: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == axis)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Render a matrix value without JSON quoting.
pub fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        f.write_str(&parts.join(", "))
    }
}

impl Serialize for Variant {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (axis, value) in &self.0 {
            map.serialize_entry(axis, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Variant {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer
            .deserialize_map(OrderedMapVisitor::<String>::new("a map of axis names to values"))
            .map(Self)
    }
}

impl JsonSchema for Variant {
    fn schema_name() -> String {
        "Variant".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        <HashMap<String, String>>::json_schema(generator)
    }
}

/// Identity of a job node: the job name bound to one variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct NodeKey {
    pub job: String,
    #[serde(default, skip_serializing_if = "Variant::is_empty")]
    pub variant: Variant,
}

impl NodeKey {
    pub fn new(job: impl Into<String>, variant: Variant) -> Self {
        Self {
            job: job.into(),
            variant,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.variant.is_empty() {
            f.write_str(&self.job)
        } else {
            write!(f, "{} ({})", self.job, self.variant)
        }
    }
}

/// Opaque reference to a credential the runner resolves for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SecretReference {
    /// Environment variable name the secret is exposed under.
    pub name: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Name of the secret inside the provider, defaults to `name`.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_true")]
    pub masked: bool,
    #[serde(default = "default_true")]
    pub required: bool,
}

impl SecretReference {
    pub fn env(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: default_provider(),
            key: None,
            masked: true,
            required: true,
        }
    }

    pub fn lookup_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.name)
    }
}

fn default_provider() -> String {
    "env".to_string()
}

fn default_true() -> bool {
    true
}
