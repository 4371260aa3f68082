//! Embedded JavaScript engine wrapper
//!
//! Every run gets a fresh `boa_engine::Context`, so no state leaks between
//! scripts. Contexts are not `Send`; everything in this module is
//! synchronous and runs on whichever thread calls it.

use boa_engine::{Context, JsError, JsValue, Script, Source};
use scribe_core::{SandboxConfig, ScriptValue};

use crate::error::Diagnostic;

/// Why a script did not yield a value
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EngineError {
    Compilation(Vec<Diagnostic>),
    Runtime(String),
}

/// Resource ceilings applied to every context
#[derive(Debug, Clone, Copy)]
pub(crate) struct EngineLimits {
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

/// Builds sandboxed contexts and runs scripts in them
#[derive(Debug, Clone)]
pub(crate) struct Engine {
    limits: EngineLimits,
    prelude: String,
}

impl Engine {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            limits: EngineLimits {
                loop_iteration_limit: config.loop_iteration_limit,
                recursion_limit: config.recursion_limit,
            },
            prelude: allow_list_prelude(&config.allowed_globals),
        }
    }

    /// Parse without executing
    pub fn check_syntax(&self, code: &str) -> Vec<Diagnostic> {
        let mut context = Context::default();
        match Script::parse(Source::from_bytes(code), None, &mut context) {
            Ok(_) => Vec::new(),
            Err(err) => vec![Diagnostic::error(error_message(err, &mut context))],
        }
    }

    /// Run a script and return the value of its last expression
    ///
    /// When `known_valid` is set the source already compiled once, so it is
    /// evaluated directly instead of going through a separate parse.
    pub fn run(&self, code: &str, known_valid: bool) -> Result<ScriptValue, EngineError> {
        let mut context = self.sandboxed_context()?;

        let result = if known_valid {
            context.eval(Source::from_bytes(code))
        } else {
            let script = Script::parse(Source::from_bytes(code), None, &mut context)
                .map_err(|err| {
                    EngineError::Compilation(vec![Diagnostic::error(error_message(
                        err,
                        &mut context,
                    ))])
                })?;
            script.evaluate(&mut context)
        };

        match result {
            Ok(value) => Ok(to_script_value(&value, &mut context)),
            Err(err) => Err(EngineError::Runtime(error_message(err, &mut context))),
        }
    }

    fn sandboxed_context(&self) -> Result<Context, EngineError> {
        let mut context = Context::default();
        {
            let limits = context.runtime_limits_mut();
            limits.set_loop_iteration_limit(self.limits.loop_iteration_limit);
            limits.set_recursion_limit(self.limits.recursion_limit);
        }

        context
            .eval(Source::from_bytes(&self.prelude))
            .map_err(|err| {
                EngineError::Runtime(format!(
                    "Failed to apply global allow-list: {}",
                    error_message(err, &mut context)
                ))
            })?;

        Ok(context)
    }
}

// Deletes every own property of the global object whose name is not allowed.
// Non-configurable bindings (undefined, NaN, Infinity) survive regardless.
//
// Unless `Function` itself is allowed, the `constructor` links on the four
// function prototypes are cut first, so `(function () {}).constructor` and
// its async/generator variants cannot build code from strings. Other
// intrinsics (Promise, iterator prototypes) stay reachable through the
// prototypes of literals.
fn allow_list_prelude(allowed: &[String]) -> String {
    let allowed_json = serde_json::to_string(allowed).unwrap_or_else(|_| "[]".to_string());
    format!(
        "(function (allowed) {{\n\
         \x20 var g = globalThis;\n\
         \x20 if (allowed.indexOf('Function') === -1) {{\n\
         \x20   var makers = [\n\
         \x20     function () {{}},\n\
         \x20     async function () {{}},\n\
         \x20     function* () {{}},\n\
         \x20     async function* () {{}}\n\
         \x20   ];\n\
         \x20   for (var m = 0; m < makers.length; m++) {{\n\
         \x20     try {{\n\
         \x20       Object.defineProperty(Object.getPrototypeOf(makers[m]), 'constructor', {{\n\
         \x20         value: undefined, writable: false, configurable: false\n\
         \x20       }});\n\
         \x20     }} catch (e) {{}}\n\
         \x20   }}\n\
         \x20 }}\n\
         \x20 var names = Object.getOwnPropertyNames(g);\n\
         \x20 for (var i = 0; i < names.length; i++) {{\n\
         \x20   if (allowed.indexOf(names[i]) === -1) {{\n\
         \x20     try {{ delete g[names[i]]; }} catch (e) {{}}\n\
         \x20   }}\n\
         \x20 }}\n\
         }})({});",
        allowed_json
    )
}

fn error_message(err: JsError, context: &mut Context) -> String {
    match err.try_native(context) {
        Ok(native) => native.to_string(),
        Err(_) => err.to_string(),
    }
}

/// Convert an engine value into the host representation
pub(crate) fn to_script_value(value: &JsValue, context: &mut Context) -> ScriptValue {
    match value {
        JsValue::Null => ScriptValue::Null,
        JsValue::Undefined => ScriptValue::Undefined,
        JsValue::Boolean(b) => ScriptValue::Boolean(*b),
        JsValue::Integer(n) => ScriptValue::Number(f64::from(*n)),
        JsValue::Rational(n) => ScriptValue::Number(*n),
        JsValue::String(s) => ScriptValue::Text(s.to_std_string_escaped()),
        JsValue::BigInt(_) => ScriptValue::Other {
            type_name: "bigint".to_string(),
            repr: value.display().to_string(),
        },
        JsValue::Symbol(_) => ScriptValue::Other {
            type_name: "symbol".to_string(),
            repr: value.display().to_string(),
        },
        JsValue::Object(object) => {
            let type_name = if object.is_array() {
                "array"
            } else if object.is_callable() {
                "function"
            } else {
                "object"
            };
            let repr = match value.to_json(context) {
                Ok(json) => json.to_string(),
                Err(_) => value.display().to_string(),
            };
            ScriptValue::Other {
                type_name: type_name.to_string(),
                repr,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(&SandboxConfig::default())
    }

    #[test]
    fn test_last_expression_is_result() {
        let value = engine().run("const x = 20 + 20; x + 20 * 10", false).unwrap();
        assert_eq!(value, ScriptValue::Number(240.0));
    }

    #[test]
    fn test_value_conversions() {
        let e = engine();
        assert_eq!(e.run("0.5 + 0.25", false).unwrap(), ScriptValue::Number(0.75));
        assert_eq!(e.run("'a' + 'b'", false).unwrap(), ScriptValue::Text("ab".into()));
        assert_eq!(e.run("1 < 2", false).unwrap(), ScriptValue::Boolean(true));
        assert_eq!(e.run("null", false).unwrap(), ScriptValue::Null);
        assert_eq!(e.run("var y = 1;", false).unwrap(), ScriptValue::Undefined);

        match e.run("[1, 2, 3]", false).unwrap() {
            ScriptValue::Other { type_name, repr } => {
                assert_eq!(type_name, "array");
                assert_eq!(repr, "[1,2,3]");
            }
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_reported() {
        let diagnostics = engine().check_syntax("let = ;");
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_error());

        assert!(engine().check_syntax("1 + 1").is_empty());
    }

    #[test]
    fn test_run_reports_compilation_separately_from_runtime() {
        let e = engine();
        assert!(matches!(
            e.run("function (", false),
            Err(EngineError::Compilation(_))
        ));

        match e.run("throw new Error('boom')", false) {
            Err(EngineError::Runtime(message)) => assert!(message.contains("boom")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_globals_outside_allow_list_removed() {
        let e = engine();
        assert_eq!(
            e.run("typeof eval", false).unwrap(),
            ScriptValue::Text("undefined".into())
        );
        assert_eq!(
            e.run("typeof Math.max", false).unwrap(),
            ScriptValue::Text("function".into())
        );
    }

    #[test]
    fn test_function_constructors_unreachable() {
        let e = engine();
        for code in [
            "typeof (function () {}).constructor",
            "typeof (() => 1).constructor",
            "typeof (async function () {}).constructor",
            "typeof (function* () {}).constructor",
            "typeof (async function* () {}).constructor",
        ] {
            assert_eq!(
                e.run(code, false).unwrap(),
                ScriptValue::Text("undefined".into()),
                "{}",
                code
            );
        }

        match e.run("(function () {}).constructor('return 1')()", false) {
            Err(EngineError::Runtime(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_allowing_function_keeps_constructor() {
        let mut config = SandboxConfig::default();
        config.allowed_globals.push("Function".to_string());
        let e = Engine::new(&config);
        assert_eq!(
            e.run("(function () {}).constructor('return 41 + 1')()", false)
                .unwrap(),
            ScriptValue::Number(42.0)
        );
    }

    #[test]
    fn test_empty_allow_list_strips_math() {
        let config = SandboxConfig {
            allowed_globals: Vec::new(),
            ..Default::default()
        };
        let e = Engine::new(&config);
        assert_eq!(
            e.run("typeof Math", false).unwrap(),
            ScriptValue::Text("undefined".into())
        );
    }

    #[test]
    fn test_loop_limit_stops_runaway_script() {
        let config = SandboxConfig {
            loop_iteration_limit: 1_000,
            ..Default::default()
        };
        let result = Engine::new(&config).run("while (true) {}", false);
        assert!(matches!(result, Err(EngineError::Runtime(_))));
    }
}
