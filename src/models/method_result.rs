//! Result model for per-method analysis output.
//!
//! Analysis routines emit loosely shaped JSON objects, one per method. The
//! interpreter resolves each payload once into a [`MethodResult`] so consumers
//! match on a closed set of variants instead of probing fields at render time.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// Analysis methods with a dedicated result shape.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, Display, AsRefStr, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum Method {
    LsbExtraction,
    ParityBitExtraction,
    MetadataExtraction,
    DctAnalysis,
    BitPlaneAnalysis,
    HistogramAnalysis,
}

impl Method {
    pub fn all() -> Vec<Method> {
        Method::iter().collect()
    }

    /// Parse `all` or a comma-separated list of method names.
    pub fn parse_selection(raw: &str) -> Result<Vec<Method>, UnknownMethod> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }

        let mut methods = Vec::new();
        for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            let method = Method::from_str(name).map_err(|_| UnknownMethod(name.to_string()))?;
            if !methods.contains(&method) {
                methods.push(method);
            }
        }

        if methods.is_empty() {
            return Ok(Self::all());
        }
        Ok(methods)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown analysis method: {0}")]
pub struct UnknownMethod(pub String);

/// Text recovered by an extraction method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedText {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Detector output: a confidence percentage with a qualitative verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub confidence: f64,
    pub assessment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Typed view over a payload that keeps the payload itself.
///
/// The view normalizes (integer confidences read as floats, explicit nulls
/// read as absent) while the stored payload stays byte-for-byte what the
/// analyzer produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpreted<T> {
    view: T,
    payload: Value,
}

impl<T> Interpreted<T> {
    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

impl<T> Deref for Interpreted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.view
    }
}

/// Outcome of running one method against one image.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResult {
    /// The routine reported an error. `payload` is the untouched raw object.
    Error { error: String, payload: Value },
    LsbExtraction(Interpreted<ExtractedText>),
    ParityBitExtraction(Interpreted<ExtractedText>),
    MetadataExtraction(Map<String, Value>),
    DctAnalysis(Interpreted<Detection>),
    BitPlaneAnalysis(Interpreted<Detection>),
    HistogramAnalysis(Interpreted<Detection>),
    /// Unknown method, or a payload that does not fit its method's shape.
    Generic(Value),
}

/// Resolve a raw payload into a typed result.
///
/// A non-null `error` field wins over every other field. String errors are
/// kept exactly as supplied; any other JSON value is kept as its JSON text.
pub fn interpret(method_name: &str, raw_payload: &Value) -> MethodResult {
    if let Some(error) = raw_payload.get("error").filter(|e| !e.is_null()) {
        let error = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return MethodResult::Error {
            error,
            payload: raw_payload.clone(),
        };
    }

    let Ok(method) = Method::from_str(method_name) else {
        return MethodResult::Generic(raw_payload.clone());
    };

    let typed = match method {
        Method::LsbExtraction => decode(raw_payload).map(MethodResult::LsbExtraction),
        Method::ParityBitExtraction => decode(raw_payload).map(MethodResult::ParityBitExtraction),
        Method::MetadataExtraction => raw_payload
            .as_object()
            .cloned()
            .map(MethodResult::MetadataExtraction),
        Method::DctAnalysis => decode(raw_payload).map(MethodResult::DctAnalysis),
        Method::BitPlaneAnalysis => decode(raw_payload).map(MethodResult::BitPlaneAnalysis),
        Method::HistogramAnalysis => decode(raw_payload).map(MethodResult::HistogramAnalysis),
    };

    typed.unwrap_or_else(|| MethodResult::Generic(raw_payload.clone()))
}

fn decode<T: serde::de::DeserializeOwned>(raw: &Value) -> Option<Interpreted<T>> {
    if !raw.is_object() {
        return None;
    }
    let view = serde_json::from_value(raw.clone()).ok()?;
    Some(Interpreted {
        view,
        payload: raw.clone(),
    })
}

impl MethodResult {
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Extracted or summary message, when the payload has one.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::LsbExtraction(text) | Self::ParityBitExtraction(text) => text.message.as_deref(),
            Self::DctAnalysis(d) | Self::BitPlaneAnalysis(d) | Self::HistogramAnalysis(d) => {
                d.message.as_deref()
            }
            Self::MetadataExtraction(_) | Self::Error { .. } | Self::Generic(_) => None,
        }
    }

    pub fn detection(&self) -> Option<&Detection> {
        match self {
            Self::DctAnalysis(d) | Self::BitPlaneAnalysis(d) | Self::HistogramAnalysis(d) => {
                Some(&**d)
            }
            _ => None,
        }
    }

    /// The JSON payload this result was interpreted from.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Error { payload, .. } => payload.clone(),
            Self::LsbExtraction(text) | Self::ParityBitExtraction(text) => text.payload().clone(),
            Self::MetadataExtraction(map) => Value::Object(map.clone()),
            Self::DctAnalysis(d) | Self::BitPlaneAnalysis(d) | Self::HistogramAnalysis(d) => {
                d.payload().clone()
            }
            Self::Generic(value) => value.clone(),
        }
    }
}

/// Method name to interpreted result, as stored on a completed job.
///
/// Serializes to (and deserializes from) the raw payload map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet(BTreeMap<String, MethodResult>);

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret every entry of a raw method → payload map.
    pub fn from_raw(raw: Map<String, Value>) -> Self {
        raw.iter()
            .map(|(method, payload)| (method.clone(), interpret(method, payload)))
            .collect()
    }

    pub fn to_raw(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(method, result)| (method.clone(), result.to_payload()))
            .collect()
    }

    pub fn get(&self, method: &str) -> Option<&MethodResult> {
        self.0.get(method)
    }

    pub fn insert(&mut self, method: impl Into<String>, result: MethodResult) {
        self.0.insert(method.into(), result);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MethodResult)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, MethodResult)> for ResultSet {
    fn from_iter<I: IntoIterator<Item = (String, MethodResult)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_raw().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ResultSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::<String, Value>::deserialize(deserializer).map(Self::from_raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lsb_payload_interprets_as_extracted_text() {
        let result = interpret("lsb_extraction", &json!({"message": "hi"}));
        assert_eq!(result.message(), Some("hi"));
        assert!(matches!(result, MethodResult::LsbExtraction(_)));
    }

    #[test]
    fn test_error_takes_precedence_over_recognized_fields() {
        let raw = json!({
            "error": "DCT analysis failed: bad block",
            "confidence": 0,
            "assessment": "Failed",
            "statistics": {"total_blocks": 0}
        });

        let result = interpret("dct_analysis", &raw);

        assert_eq!(result.error(), Some("DCT analysis failed: bad block"));
        assert_eq!(result.to_payload(), raw);
    }

    #[test]
    fn test_error_string_is_preserved_verbatim() {
        let message = "  weird\terror: ünïcode \"quoted\"  ";
        let result = interpret("lsb_extraction", &json!({"error": message}));
        assert_eq!(result.error(), Some(message));
    }

    #[test]
    fn test_null_error_is_not_an_error() {
        let result = interpret("lsb_extraction", &json!({"error": null, "message": "ok"}));
        assert!(!result.is_error());
    }

    #[test]
    fn test_error_applies_to_unknown_methods_too() {
        let result = interpret("future_method", &json!({"error": "boom", "x": 1}));
        assert_eq!(result.error(), Some("boom"));
    }

    #[test]
    fn test_unknown_method_wraps_payload_verbatim() {
        let raw = json!({"score": 0.4, "nested": {"a": [1, 2, 3]}});
        let result = interpret("chi_square_attack", &raw);
        assert_eq!(result, MethodResult::Generic(raw.clone()));
        assert_eq!(result.to_payload(), raw);
    }

    #[test]
    fn test_mismatched_shape_falls_back_to_generic() {
        let raw = json!({"assessment": "Suspicious"});
        assert!(matches!(
            interpret("histogram_analysis", &raw),
            MethodResult::Generic(_)
        ));
        assert!(matches!(
            interpret("lsb_extraction", &json!("plain string")),
            MethodResult::Generic(_)
        ));
    }

    #[test]
    fn test_detection_keeps_method_specific_fields() {
        let raw = json!({
            "confidence": 4.1666,
            "assessment": "Likely clean",
            "suspicious_planes": 1,
            "message": "Bit plane analysis complete."
        });

        let result = interpret("bit_plane_analysis", &raw);
        let detection = result.detection().unwrap();

        assert_eq!(detection.assessment, "Likely clean");
        assert_eq!(detection.extra["suspicious_planes"], 1);
        assert_eq!(result.to_payload(), raw);
    }

    #[test]
    fn test_payload_survives_normalization() {
        let raw = json!({"confidence": 0, "assessment": "Clean", "message": null});
        let result = interpret("histogram_analysis", &raw);

        let detection = result.detection().unwrap();
        assert_eq!(detection.confidence, 0.0);
        assert_eq!(detection.message, None);
        assert_eq!(result.to_payload().to_string(), raw.to_string());

        let raw = json!({"message": null, "bits_read": 96});
        let result = interpret("parity_bit_extraction", &raw);
        assert_eq!(result.message(), None);
        assert_eq!(result.to_payload(), raw);

        let set = ResultSet::from_raw(json!({"histogram_analysis": {"confidence": 7, "assessment": "x"}})
            .as_object()
            .cloned()
            .unwrap());
        assert_eq!(
            serde_json::to_string(&set).unwrap(),
            r#"{"histogram_analysis":{"assessment":"x","confidence":7}}"#
        );
    }

    #[test]
    fn test_metadata_is_raw_key_values() {
        let raw = json!({"format": "PNG", "mode": "Rgb8", "size": [4, 4]});
        match interpret("metadata_extraction", &raw) {
            MethodResult::MetadataExtraction(map) => assert_eq!(map["format"], "PNG"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_interpret_is_idempotent() {
        let raw = json!({"confidence": 12.5, "assessment": "Likely clean", "statistics": {"zero_count": 3}});
        assert_eq!(interpret("dct_analysis", &raw), interpret("dct_analysis", &raw));
    }

    #[test]
    fn test_result_set_serializes_to_raw_payloads() {
        let raw = json!({
            "lsb_extraction": {"message": "hi"},
            "histogram_analysis": {"error": "Histogram analysis failed: empty"},
            "custom": [1, 2]
        });

        let set: ResultSet = serde_json::from_value(raw.clone()).unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(set.get("lsb_extraction").unwrap().message(), Some("hi"));
        assert!(set.get("histogram_analysis").unwrap().is_error());
        let errors: Vec<&String> = set.iter().filter(|(_, r)| r.is_error()).map(|(m, _)| m).collect();
        assert_eq!(errors, vec!["histogram_analysis"]);
        assert_eq!(serde_json::to_value(&set).unwrap(), raw);
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!(Method::parse_selection("all").unwrap().len(), 6);
        assert_eq!(Method::parse_selection("").unwrap().len(), 6);
        assert_eq!(
            Method::parse_selection("lsb_extraction, dct_analysis,lsb_extraction").unwrap(),
            vec![Method::LsbExtraction, Method::DctAnalysis]
        );
        assert_eq!(
            Method::parse_selection("lsb_extraction,nope"),
            Err(UnknownMethod("nope".to_string()))
        );
    }
}
