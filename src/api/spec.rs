//! API description loading
//!
//! Swagger 2.0 and OpenAPI 3.x documents are read as JSON or YAML into a single
//! `serde_json::Value` with every `$ref` inlined. Local (`#/definitions/x`) and
//! relative-file (`common.yaml#/components/parameters/x`) references are followed;
//! a reference that points back into its own expansion is left as written.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::utils::{collapse_slashes, read_file};

/// Major version family of an API description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecVersion {
    Swagger2,
    OpenApi3,
}

/// Where a parameter is carried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterLocation {
    Header,
    Query,
    Path,
    Cookie,
    Body,
    FormData,
}

impl ParameterLocation {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "header" => Some(Self::Header),
            "query" => Some(Self::Query),
            "path" => Some(Self::Path),
            "cookie" => Some(Self::Cookie),
            "body" => Some(Self::Body),
            "formData" => Some(Self::FormData),
            _ => None,
        }
    }
}

/// A declared parameter with its resolved default value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub location: ParameterLocation,
    pub default_value: String,
}

impl Parameter {
    /// Read a (resolved) parameter object; `None` when `name` or `in` is missing
    pub fn from_value(value: &Value) -> Option<Self> {
        let name = value.get("name")?.as_str()?.to_string();
        let location = ParameterLocation::parse(value.get("in")?.as_str()?)?;
        Some(Self {
            name,
            location,
            default_value: default_value(value),
        })
    }

    /// Header or query parameter, the two kinds that become graph nodes
    pub fn is_materialized(&self) -> bool {
        matches!(self.location, ParameterLocation::Header | ParameterLocation::Query)
    }

    pub fn same_slot(&self, other: &Parameter) -> bool {
        self.location == other.location && self.name.eq_ignore_ascii_case(&other.name)
    }
}

/// Default of a parameter: `schema.default`, `schema.example`, `default`, `example`, else `""`
pub fn default_value(parameter: &Value) -> String {
    let schema = parameter.get("schema");
    [
        schema.and_then(|s| s.get("default")),
        schema.and_then(|s| s.get("example")),
        parameter.get("default"),
        parameter.get("example"),
    ]
    .into_iter()
    .flatten()
    .find(|v| !v.is_null())
    .map(scalar_text)
    .unwrap_or_default()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A loaded API description
#[derive(Debug, Clone)]
pub struct ApiSpec {
    artifact: String,
    version: SpecVersion,
    document: Value,
}

impl ApiSpec {
    /// Load a JSON or YAML description and resolve its references
    pub fn load(path: &Path) -> Result<Self> {
        let artifact = path.display().to_string();
        let document = parse_document(&read_file(path)?, path)?;
        Self::from_value(document, &artifact, path.parent())
    }

    /// Build from an already parsed document; relative file references resolve against `base_dir`
    pub fn from_value(document: Value, artifact: &str, base_dir: Option<&Path>) -> Result<Self> {
        let version = detect_version(&document)
            .ok_or_else(|| Error::spec_validation(artifact, "neither 'swagger: 2.0' nor 'openapi: 3.x' is declared"))?;

        match document.get("paths") {
            None | Some(Value::Object(_)) => {}
            Some(_) => return Err(Error::spec_validation(artifact, "'paths' must be an object")),
        }

        let mut resolver = RefResolver {
            artifact: artifact.to_string(),
            files: HashMap::new(),
            stack: Vec::new(),
        };
        let document = resolver.resolve(&document, &document, "", base_dir)?;

        debug!(artifact, ?version, "Loaded API description");
        Ok(Self {
            artifact: artifact.to_string(),
            version,
            document,
        })
    }

    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    pub fn version(&self) -> SpecVersion {
        self.version
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// The `paths` object in declaration order
    pub fn paths(&self) -> Option<&Map<String, Value>> {
        self.document.get("paths").and_then(Value::as_object)
    }

    /// Base paths operations are mounted under, `""` meaning "paths as written"
    ///
    /// Swagger 2.0 has the single `basePath`; OpenAPI 3 has the path component of every
    /// `servers[].url`, with server variables replaced by their defaults.
    pub fn base_paths(&self) -> Vec<String> {
        let mut bases: Vec<String> = Vec::new();
        match self.version {
            SpecVersion::Swagger2 => {
                if let Some(base) = self.document.get("basePath").and_then(Value::as_str) {
                    bases.push(normalize_base(base));
                }
            }
            SpecVersion::OpenApi3 => {
                let servers = self.document.get("servers").and_then(Value::as_array);
                for server in servers.into_iter().flatten() {
                    let Some(url) = server.get("url").and_then(Value::as_str) else {
                        continue;
                    };
                    let base = normalize_base(&server_path(&substitute_variables(url, server)));
                    if !bases.contains(&base) {
                        bases.push(base);
                    }
                }
            }
        }
        if bases.is_empty() {
            bases.push(String::new());
        }
        bases
    }

    /// Globally declared parameters (`parameters` / `components.parameters`)
    pub fn global_parameters(&self) -> Vec<Parameter> {
        let declared = match self.version {
            SpecVersion::Swagger2 => self.document.get("parameters"),
            SpecVersion::OpenApi3 => self.document.pointer("/components/parameters"),
        };
        declared
            .and_then(Value::as_object)
            .map(|params| params.values().filter_map(Parameter::from_value).collect())
            .unwrap_or_default()
    }
}

fn detect_version(document: &Value) -> Option<SpecVersion> {
    if document.get("swagger").and_then(version_text).is_some_and(|v| v.starts_with('2')) {
        return Some(SpecVersion::Swagger2);
    }
    if document.get("openapi").and_then(version_text).is_some_and(|v| v.starts_with('3')) {
        return Some(SpecVersion::OpenApi3);
    }
    None
}

fn version_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `/v2/` -> `/v2`, `v2` -> `/v2`, `/` -> ``
pub fn normalize_base(base: &str) -> String {
    let trimmed = collapse_slashes(base.trim()).trim_end_matches('/').to_string();
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed
    } else {
        format!("/{trimmed}")
    }
}

fn substitute_variables(url: &str, server: &Value) -> String {
    let mut url = url.to_string();
    if let Some(variables) = server.get("variables").and_then(Value::as_object) {
        for (name, variable) in variables {
            let default = variable.get("default").map(scalar_text).unwrap_or_default();
            url = url.replace(&format!("{{{name}}}"), &default);
        }
    }
    url
}

fn server_path(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        // relative server URL such as "/v2"
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    }
}

/// Parse JSON or YAML, choosing by extension and falling back on content
pub fn parse_document(text: &str, path: &Path) -> Result<Value> {
    let artifact = path.display().to_string();
    let is_json = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => true,
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => false,
        _ => text.trim_start().starts_with('{'),
    };

    if is_json {
        serde_json::from_str(text).map_err(|e| Error::spec_validation(&artifact, format!("invalid JSON: {e}")))
    } else {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| Error::spec_validation(&artifact, format!("invalid YAML: {e}")))?;
        Ok(yaml_to_json(yaml))
    }
}

/// YAML to JSON with non-string keys (`200:`) stringified
fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64().map_or(Value::Null, Value::from)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => Value::Array(items.into_iter().map(yaml_to_json).collect()),
        serde_yaml::Value::Mapping(mapping) => Value::Object(
            mapping
                .into_iter()
                .map(|(k, v)| (yaml_key(k), yaml_to_json(v)))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(&other).unwrap_or_default().trim().to_string(),
    }
}

struct RefResolver {
    artifact: String,
    files: HashMap<PathBuf, Value>,
    stack: Vec<String>,
}

impl RefResolver {
    /// Copy of `node` with references inlined; `root` is the document `node` lives in
    fn resolve(&mut self, node: &Value, root: &Value, doc_id: &str, base_dir: Option<&Path>) -> Result<Value> {
        match node {
            Value::Object(map) => {
                if let Some(Value::String(reference)) = map.get("$ref") {
                    return self.follow(node, reference, root, doc_id, base_dir);
                }
                let mut resolved = Map::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(key.clone(), self.resolve(value, root, doc_id, base_dir)?);
                }
                Ok(Value::Object(resolved))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item, root, doc_id, base_dir))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn follow(
        &mut self,
        node: &Value,
        reference: &str,
        root: &Value,
        doc_id: &str,
        base_dir: Option<&Path>,
    ) -> Result<Value> {
        let (file, fragment) = reference.split_once('#').unwrap_or((reference, ""));

        let (document, target_id, target_base) = if file.is_empty() {
            (None, doc_id.to_string(), base_dir.map(Path::to_path_buf))
        } else {
            let path = base_dir.map_or_else(|| PathBuf::from(file), |dir| dir.join(file));
            let document = self.external(&path)?;
            let parent = path.parent().map(Path::to_path_buf);
            (Some(document), path.display().to_string(), parent)
        };

        let key = format!("{target_id}#{fragment}");
        if self.stack.contains(&key) {
            warn!(artifact = %self.artifact, reference, "Recursive $ref left unresolved");
            return Ok(node.clone());
        }

        let document_root = document.as_ref().unwrap_or(root);
        let target = document_root
            .pointer(&decode_pointer(fragment))
            .cloned()
            .ok_or_else(|| Error::spec_validation(&self.artifact, format!("unresolvable $ref '{reference}'")))?;

        self.stack.push(key);
        let resolved = self.resolve(&target, document_root, &target_id, target_base.as_deref());
        self.stack.pop();
        resolved
    }

    fn external(&mut self, path: &Path) -> Result<Value> {
        if let Some(document) = self.files.get(path) {
            return Ok(document.clone());
        }
        let text = read_file(path)
            .map_err(|e| Error::spec_validation(&self.artifact, format!("referenced file unavailable: {e}")))?;
        let document = parse_document(&text, path)?;
        self.files.insert(path.to_path_buf(), document.clone());
        Ok(document)
    }
}

/// URL-decode the few characters that appear escaped in JSON pointers to path items
fn decode_pointer(fragment: &str) -> String {
    fragment
        .replace("%7B", "{")
        .replace("%7b", "{")
        .replace("%7D", "}")
        .replace("%7d", "}")
        .replace("%25", "%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parameter_default_preference() {
        let p = json!({"name": "Fiware-Service", "in": "header",
            "schema": {"type": "string", "default": "demo", "example": "ex"}, "default": "d"});
        assert_eq!(default_value(&p), "demo");

        let p = json!({"name": "x", "in": "query", "schema": {"example": 5}, "default": "d"});
        assert_eq!(default_value(&p), "5");

        let p = json!({"name": "x", "in": "query", "example": "e"});
        assert_eq!(default_value(&p), "e");

        let p = json!({"name": "x", "in": "query"});
        assert_eq!(default_value(&p), "");
    }

    #[test]
    fn test_swagger_base_path() {
        let spec = ApiSpec::from_value(json!({"swagger": "2.0", "basePath": "v2/", "paths": {}}), "s", None).unwrap();
        assert_eq!(spec.version(), SpecVersion::Swagger2);
        assert_eq!(spec.base_paths(), vec!["/v2"]);

        let spec = ApiSpec::from_value(json!({"swagger": "2.0", "paths": {}}), "s", None).unwrap();
        assert_eq!(spec.base_paths(), vec![""]);
    }

    #[test]
    fn test_openapi_server_paths() {
        let spec = ApiSpec::from_value(
            json!({
                "openapi": "3.0.1",
                "servers": [
                    {"url": "http://orion:1026/v2/"},
                    {"url": "/v2"},
                    {"url": "{scheme}://broker/{version}", "variables": {
                        "scheme": {"default": "https"}, "version": {"default": "ngsi-ld/v1"}}},
                    {"url": "http://orion:1026"}
                ],
                "paths": {}
            }),
            "o",
            None,
        )
        .unwrap();
        assert_eq!(spec.base_paths(), vec!["/v2", "/ngsi-ld/v1", ""]);
    }

    #[test]
    fn test_local_refs_resolved() {
        let spec = ApiSpec::from_value(
            json!({
                "openapi": "3.0.0",
                "components": {"parameters": {
                    "Service": {"name": "Fiware-Service", "in": "header", "schema": {"$ref": "#/components/schemas/Tenant"}}
                }, "schemas": {"Tenant": {"type": "string", "default": "demo"}}},
                "paths": {"/a": {"get": {"parameters": [{"$ref": "#/components/parameters/Service"}]}}}
            }),
            "o",
            None,
        )
        .unwrap();

        let op_param = spec.document().pointer("/paths/~1a/get/parameters/0").unwrap();
        assert_eq!(op_param["name"], "Fiware-Service");
        assert_eq!(spec.global_parameters()[0].default_value, "demo");
    }

    #[test]
    fn test_recursive_ref_left_in_place() {
        let spec = ApiSpec::from_value(
            json!({
                "openapi": "3.0.0",
                "components": {"schemas": {"Node": {"properties": {"child": {"$ref": "#/components/schemas/Node"}}}}},
                "paths": {}
            }),
            "o",
            None,
        )
        .unwrap();
        let child = spec
            .document()
            .pointer("/components/schemas/Node/properties/child/properties/child")
            .unwrap();
        assert_eq!(child["$ref"], "#/components/schemas/Node");
    }

    #[test]
    fn test_unresolvable_ref_rejected() {
        let err = ApiSpec::from_value(
            json!({"swagger": "2.0", "paths": {"/a": {"get": {"parameters": [{"$ref": "#/parameters/missing"}]}}}}),
            "s",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::SpecValidation { .. }));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let err = ApiSpec::from_value(json!({"paths": {}}), "x.json", None).unwrap_err();
        assert!(matches!(err, Error::SpecValidation { .. }));
    }

    #[test]
    fn test_yaml_with_external_ref() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("common.yaml"),
            "parameters:\n  Service:\n    name: Fiware-Service\n    in: header\n    default: demo\n",
        )
        .unwrap();
        let spec_path = dir.path().join("api.yaml");
        std::fs::write(
            &spec_path,
            "swagger: '2.0'\nbasePath: /v2\nparameters:\n  Service:\n    $ref: 'common.yaml#/parameters/Service'\npaths:\n  /version:\n    get:\n      responses:\n        200:\n          description: ok\n",
        )
        .unwrap();

        let spec = ApiSpec::load(&spec_path).unwrap();
        assert_eq!(spec.global_parameters()[0].name, "Fiware-Service");
        assert!(spec.document().pointer("/paths/~1version/get/responses/200").is_some());
    }
}
