use liquid_core::Result;
use liquid_core::Runtime;
use liquid_core::{Display_filter, Filter, FilterReflection, ParseFilter};
use liquid_core::{Value, ValueView};
use serde_json::{to_string, to_string_pretty};

/// JSON that can sit inside a `<script>` element without ending it early.
pub fn script_safe_json(s: &str) -> String {
    s.replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

#[derive(Clone, ParseFilter, FilterReflection)]
#[filter(
    name = "json",
    description = "Render the provided object into pretty-printed JSON.",
    parsed(JsonFilter)
)]
pub struct JsonFilterParser;

#[derive(Debug, Default, Display_filter)]
#[name = "json"]
struct JsonFilter;

impl Filter for JsonFilter {
    fn evaluate(&self, input: &dyn ValueView, _runtime: &dyn Runtime) -> Result<Value> {
        let s = to_string_pretty(&input.to_value()).unwrap_or_else(|_e| "".to_string());
        Ok(Value::scalar(s))
    }
}

#[derive(Clone, ParseFilter, FilterReflection)]
#[filter(
    name = "script_json",
    description = "Render the provided object as compact JSON safe to embed in a script element.",
    parsed(ScriptJsonFilter)
)]
pub struct ScriptJsonFilterParser;

#[derive(Debug, Default, Display_filter)]
#[name = "script_json"]
struct ScriptJsonFilter;

impl Filter for ScriptJsonFilter {
    fn evaluate(&self, input: &dyn ValueView, _runtime: &dyn Runtime) -> Result<Value> {
        let s = to_string(&input.to_value()).unwrap_or_else(|_e| "null".to_string());
        Ok(Value::scalar(script_safe_json(&s)))
    }
}

#[test]
fn test_script_safe_json() {
    assert_eq!(
        script_safe_json(r#"{"label":"</script><b>&"}"#),
        r#"{"label":"\u003c/script\u003e\u003cb\u003e\u0026"}"#
    );
}
