//! Harness generation: wraps user source so the artifact reads a JSON argument list
//! from `SANDBOX_ARGS`, calls the entry point and prints the JSON-encoded result.
//!
//! Argument types come from the question's declared parameters, so the generated code
//! converts each argument explicitly instead of relying on runtime reflection. A
//! mismatch between the submitted arguments and the declaration is rejected before
//! any build tool runs.

use crate::catalog::{Parameter, ParameterType, ScalarType};
use crate::docker::Instruction;
use crate::model::Language;
use serde_json::Value;
use std::fmt::Write as _;

pub const ARGS_ENV: &str = "SANDBOX_ARGS";

#[derive(Debug, Clone)]
pub struct BaseImages {
    pub python: String,
    pub go: String,
    pub go_runtime: String,
}

impl Default for BaseImages {
    fn default() -> Self {
        Self {
            python: "python:3.12-slim".to_string(),
            go: "golang:1.22-alpine".to_string(),
            go_runtime: "alpine:3.20".to_string(),
        }
    }
}

/// Files to write into the build working directory plus the descriptor to build them with
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub files: Vec<(String, String)>,
    pub descriptor: Vec<Instruction>,
}

/// Check arity and JSON shape of the submitted arguments against the declaration
pub fn check_arguments(params: &[Parameter], args: &[Value]) -> Result<(), String> {
    if params.len() != args.len() {
        return Err(format!(
            "entry point takes {} argument(s) but {} were supplied",
            params.len(),
            args.len()
        ));
    }
    for (param, arg) in params.iter().zip(args) {
        if !param.kind.accepts(arg) {
            return Err(format!(
                "argument '{}' (position {}) must be of type {}, got {}",
                param.name, param.position, param.kind, arg
            ));
        }
    }
    Ok(())
}

/// `params` must already be in call order
pub fn assemble(
    language: Language,
    source: &str,
    entry_point: &str,
    params: &[Parameter],
    images: &BaseImages,
    run_as_user: i64,
) -> BuildContext {
    match language {
        Language::Python => python_context(source, entry_point, params, images, run_as_user),
        Language::Go => go_context(source, entry_point, params, images, run_as_user),
    }
}

fn python_convert(kind: ParameterType, expr: &str) -> String {
    match kind {
        ParameterType::Scalar(scalar) => {
            let func = match scalar {
                ScalarType::Int => "int",
                ScalarType::Double | ScalarType::Float => "float",
                ScalarType::String | ScalarType::Char => "str",
                ScalarType::Bool => "bool",
            };
            format!("{}({})", func, expr)
        }
        ParameterType::Array(scalar) => format!(
            "[{} for v in {}]",
            python_convert(ParameterType::Scalar(scalar), "v"),
            expr
        ),
    }
}

pub fn python_harness(entry_point: &str, params: &[Parameter]) -> String {
    let call_args: Vec<String> = params
        .iter()
        .enumerate()
        .map(|(i, p)| python_convert(p.kind, &format!("args[{}]", i)))
        .collect();

    let mut out = String::new();
    out.push_str("import json\nimport os\nimport sys\n\nimport solution\n\n\n");
    out.push_str("def main():\n");
    let _ = writeln!(out, "    args = json.loads(os.environ.get(\"{}\", \"[]\"))", ARGS_ENV);
    let _ = writeln!(out, "    if len(args) != {}:", params.len());
    let _ = writeln!(
        out,
        "        sys.stderr.write(\"harness: expected {} arguments, got %d\\n\" % len(args))",
        params.len()
    );
    out.push_str("        sys.exit(2)\n");
    let _ = writeln!(
        out,
        "    result = solution.{}({})",
        entry_point,
        call_args.join(", ")
    );
    out.push_str("    sys.stdout.write(json.dumps(result) + \"\\n\")\n");
    out.push_str("    sys.stdout.flush()\n\n\n");
    out.push_str("if __name__ == \"__main__\":\n    main()\n");
    out
}

const PYTHON_ENTRY_CHECK: &str = r#"import ast
import sys

name = sys.argv[1]
with open("solution.py") as fh:
    tree = ast.parse(fh.read(), "solution.py")
defined = any(
    isinstance(node, ast.FunctionDef) and node.name == name for node in tree.body
)
if not defined:
    sys.exit("entry point '%s' is not defined at the top level of solution.py" % name)
"#;

fn python_context(
    source: &str,
    entry_point: &str,
    params: &[Parameter],
    images: &BaseImages,
    run_as_user: i64,
) -> BuildContext {
    let files = vec![
        ("solution.py".to_string(), source.to_string()),
        ("harness.py".to_string(), python_harness(entry_point, params)),
        ("check_entry.py".to_string(), PYTHON_ENTRY_CHECK.to_string()),
    ];
    // The entry check parses the source without importing it
    let descriptor = vec![
        Instruction::from_image(&images.python),
        Instruction::Workdir("/app".into()),
        Instruction::copy(&["solution.py", "harness.py", "check_entry.py"], "./"),
        Instruction::Run(format!(
            "python3 -m py_compile solution.py harness.py && python3 check_entry.py {} && rm check_entry.py",
            entry_point
        )),
        Instruction::Env("PYTHONDONTWRITEBYTECODE".into(), "1".into()),
        Instruction::User(run_as_user.to_string()),
        Instruction::Entrypoint(vec![
            "python3".into(),
            "-u".into(),
            "/app/harness.py".into(),
        ]),
    ];
    BuildContext { files, descriptor }
}

fn go_type(kind: ParameterType) -> String {
    let scalar = |s: ScalarType| match s {
        ScalarType::Int => "int",
        ScalarType::Double => "float64",
        ScalarType::Float => "float32",
        ScalarType::String => "string",
        ScalarType::Char => "rune",
        ScalarType::Bool => "bool",
    };
    match kind {
        ParameterType::Scalar(s) => scalar(s).to_string(),
        ParameterType::Array(s) => format!("[]{}", scalar(s)),
    }
}

const GO_HELPERS: &str = r#"func sandboxFail(format string, args ...interface{}) {
	fmt.Fprintf(os.Stderr, "harness: "+format+"\n", args...)
	os.Exit(2)
}

func sandboxDecodeChar(raw json.RawMessage) (rune, error) {
	var s string
	if err := json.Unmarshal(raw, &s); err != nil {
		return 0, err
	}
	r := []rune(s)
	if len(r) != 1 {
		return 0, fmt.Errorf("expected a single character, got %q", s)
	}
	return r[0], nil
}

func sandboxDecodeChars(raw json.RawMessage) ([]rune, error) {
	var items []string
	if err := json.Unmarshal(raw, &items); err != nil {
		return nil, err
	}
	out := make([]rune, 0, len(items))
	for _, item := range items {
		r := []rune(item)
		if len(r) != 1 {
			return nil, fmt.Errorf("expected single characters, got %q", item)
		}
		out = append(out, r[0])
	}
	return out, nil
}
"#;

pub fn go_harness(entry_point: &str, params: &[Parameter]) -> String {
    let mut out = String::new();
    out.push_str("// Code generated by sandexec. DO NOT EDIT.\n\npackage main\n\n");
    out.push_str("import (\n\t\"encoding/json\"\n\t\"fmt\"\n\t\"os\"\n)\n\n");
    out.push_str(GO_HELPERS);
    out.push_str("\nfunc main() {\n");
    out.push_str("\tvar raw []json.RawMessage\n");
    let _ = writeln!(
        out,
        "\tif err := json.Unmarshal([]byte(os.Getenv(\"{}\")), &raw); err != nil {{",
        ARGS_ENV
    );
    out.push_str("\t\tsandboxFail(\"invalid argument payload: %v\", err)\n\t}\n");
    let _ = writeln!(out, "\tif len(raw) != {} {{", params.len());
    let _ = writeln!(
        out,
        "\t\tsandboxFail(\"expected {} arguments, got %d\", len(raw))\n\t}}",
        params.len()
    );

    for (i, param) in params.iter().enumerate() {
        let _ = writeln!(out, "\tvar arg{} {}", i, go_type(param.kind));
        let decoder = match param.kind {
            ParameterType::Scalar(ScalarType::Char) => Some("sandboxDecodeChar"),
            ParameterType::Array(ScalarType::Char) => Some("sandboxDecodeChars"),
            _ => None,
        };
        match decoder {
            Some(func) => {
                let _ = writeln!(
                    out,
                    "\tif v, err := {}(raw[{}]); err != nil {{\n\t\tsandboxFail(\"argument {}: %v\", err)\n\t}} else {{\n\t\targ{} = v\n\t}}",
                    func, i, param.name, i
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "\tif err := json.Unmarshal(raw[{}], &arg{}); err != nil {{\n\t\tsandboxFail(\"argument {}: %v\", err)\n\t}}",
                    i, i, param.name
                );
            }
        }
    }

    let call_args: Vec<String> = (0..params.len()).map(|i| format!("arg{}", i)).collect();
    let _ = writeln!(out, "\tresult := {}({})", entry_point, call_args.join(", "));
    out.push_str("\tout, err := json.Marshal(result)\n\tif err != nil {\n");
    out.push_str("\t\tsandboxFail(\"cannot encode result: %v\", err)\n\t}\n");
    out.push_str("\tfmt.Println(string(out))\n}\n");
    out
}

fn has_package_clause(source: &str) -> bool {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    PATTERN
        .get_or_init(|| regex::Regex::new(r"(?m)^\s*package\s+\w+").expect("valid regex"))
        .is_match(source)
}

fn go_context(
    source: &str,
    entry_point: &str,
    params: &[Parameter],
    images: &BaseImages,
    run_as_user: i64,
) -> BuildContext {
    let source = if has_package_clause(source) {
        source.to_string()
    } else {
        format!("package main\n\n{}", source)
    };
    let files = vec![
        ("go.mod".to_string(), "module solution\n\ngo 1.22\n".to_string()),
        ("solution.go".to_string(), source),
        ("harness.go".to_string(), go_harness(entry_point, params)),
    ];
    let descriptor = vec![
        Instruction::From {
            image: images.go.clone(),
            alias: Some("build".into()),
        },
        Instruction::Workdir("/src".into()),
        Instruction::copy(&["go.mod", "solution.go", "harness.go"], "./"),
        Instruction::Run("CGO_ENABLED=0 go build -o /out/solution .".into()),
        Instruction::from_image(&images.go_runtime),
        Instruction::Copy {
            sources: vec!["/out/solution".into()],
            dest: "/app/solution".into(),
            from: Some("build".into()),
        },
        Instruction::User(run_as_user.to_string()),
        Instruction::Entrypoint(vec!["/app/solution".into()]),
    ];
    BuildContext { files, descriptor }
}
