//! Request deserialization for the dispatch loop.
//!
//! Parsing happens in two steps. The envelope is decoded first so a request
//! with a well-formed line but an unknown method or bad parameters can be
//! answered without dropping the connection. The router then decodes the
//! method's parameters into one of the typed structs below.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use vcsim_core::ObjectReference;
use vcsim_core::collector::PropertyFilterSpec;

use super::errors::DispatchError;

/// Parsed request envelope.
#[derive(Debug, Deserialize)]
pub struct RequestEnvelope {
    /// Protocol method name.
    pub method: String,
    /// Method parameters; absent parameters decode as an empty object.
    #[serde(default)]
    pub params: Value,
}

impl RequestEnvelope {
    /// Parses a JSONL line into a request envelope.
    ///
    /// Trailing whitespace (including the newline delimiter) is trimmed
    /// before parsing.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::MalformedJsonl` if the line is empty or is not
    /// a JSON object with a `method` string.
    pub fn parse(line: &[u8]) -> Result<Self, DispatchError> {
        let trimmed = line.trim_ascii_end();
        if trimmed.is_empty() {
            return Err(DispatchError::malformed("empty request line"));
        }
        serde_json::from_slice(trimmed).map_err(DispatchError::from_json_error)
    }

    /// Returns the normalised method name (trimmed).
    pub fn method(&self) -> &str {
        self.method.trim()
    }

    /// Decodes the parameters for this request's method.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidParams` when the parameters do not
    /// match `T`.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, DispatchError> {
        let params = match &self.params {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        serde_json::from_value(params)
            .map_err(|error| DispatchError::invalid_params(self.method(), error.to_string()))
    }
}

/// Object reference in either `"Kind:id"` text form or `{"kind","id"}` form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ReferenceParam {
    /// `Kind:id` text.
    Text(String),
    /// Structured reference.
    Structured(ObjectReference),
}

impl ReferenceParam {
    /// Resolves the reference, naming `field` in the error when the text form
    /// is malformed.
    pub fn resolve(&self, method: &str, field: &str) -> Result<ObjectReference, DispatchError> {
        match self {
            Self::Structured(reference) => Ok(reference.clone()),
            Self::Text(text) => text
                .parse()
                .map_err(|error| DispatchError::invalid_params(method, format!("{field}: {error}"))),
        }
    }
}

/// Parameters of `invoke`.
#[derive(Debug, Deserialize)]
pub struct InvokeParams {
    /// Target object.
    pub obj: ReferenceParam,
    /// Operation name.
    pub operation: String,
    /// Operation arguments.
    #[serde(default)]
    pub args: Value,
    /// User recorded on tasks and events; the simulator default when absent.
    #[serde(default)]
    pub user: Option<String>,
}

/// Parameters of `retrieveProperties`.
#[derive(Debug, Deserialize)]
pub struct RetrieveParams {
    /// Specs evaluated in order; results are concatenated.
    pub specs: Vec<PropertyFilterSpec>,
}

/// Parameters of `createFilter`.
#[derive(Debug, Deserialize)]
pub struct CreateFilterParams {
    /// What the filter watches.
    pub spec: PropertyFilterSpec,
}

/// Parameters of `waitForUpdates`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitParams {
    /// Filter to wait on.
    pub filter: ReferenceParam,
    /// Last version token received; absent for the initial full update.
    #[serde(default)]
    pub version: Option<u64>,
    /// Longest time to block, further capped by the daemon's configured limit.
    #[serde(default)]
    pub max_wait_seconds: Option<u64>,
}

/// Parameters of `destroyFilter`.
#[derive(Debug, Deserialize)]
pub struct DestroyFilterParams {
    /// Filter to destroy.
    pub filter: ReferenceParam,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn parses_request_without_params() {
        let request = RequestEnvelope::parse(br#"{"method":"retrieveProperties"}"#).expect("parse");
        assert_eq!(request.method(), "retrieveProperties");
        assert_eq!(request.params, Value::Null);
    }

    #[test]
    fn trims_trailing_whitespace() {
        let input = b"{\"method\":\" destroyFilter \",\"params\":{}}  \n";
        let request = RequestEnvelope::parse(input).expect("parse with whitespace");
        assert_eq!(request.method(), "destroyFilter");
    }

    #[rstest]
    #[case(b"".as_slice())]
    #[case(b"   \n".as_slice())]
    #[case(b"not json".as_slice())]
    #[case(br#"{"params":{}}"#.as_slice())]
    fn rejects_malformed_lines(#[case] input: &[u8]) {
        let result = RequestEnvelope::parse(input);
        assert!(matches!(result, Err(DispatchError::MalformedJsonl { .. })));
    }

    #[rstest]
    #[case(r#""VirtualMachine:vm-7""#)]
    #[case(r#"{"kind":"VirtualMachine","id":"vm-7"}"#)]
    fn invoke_accepts_both_reference_forms(#[case] obj: &str) {
        let line = format!(r#"{{"method":"invoke","params":{{"obj":{obj},"operation":"powerOnVM"}}}}"#);
        let request = RequestEnvelope::parse(line.as_bytes()).expect("parse");
        let params: InvokeParams = request.params().expect("params");
        let reference = params.obj.resolve("invoke", "obj").expect("reference");
        assert_eq!(reference, ObjectReference::new("VirtualMachine", "vm-7"));
        assert_eq!(params.args, Value::Null);
        assert_eq!(params.user, None);
    }

    #[test]
    fn malformed_text_reference_names_the_field() {
        let param = ReferenceParam::Text("vm-7".to_owned());
        let error = param.resolve("destroyFilter", "filter").expect_err("no separator");
        assert!(matches!(error, DispatchError::InvalidParams { .. }));
        assert!(error.to_string().contains("filter"));
    }

    #[test]
    fn wait_params_use_camel_case() {
        let request = RequestEnvelope::parse(
            br#"{"method":"waitForUpdates","params":{"filter":"PropertyFilter:filter-1","version":3,"maxWaitSeconds":5}}"#,
        )
        .expect("parse");
        let params: WaitParams = request.params().expect("params");
        assert_eq!(params.version, Some(3));
        assert_eq!(params.max_wait_seconds, Some(5));
    }

    #[test]
    fn missing_required_params_are_reported() {
        let request = RequestEnvelope::parse(br#"{"method":"createFilter"}"#).expect("parse");
        let error = request
            .params::<CreateFilterParams>()
            .expect_err("spec is required");
        assert!(matches!(error, DispatchError::InvalidParams { .. }));
    }
}
