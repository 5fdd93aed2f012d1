//! End-to-end execution tests against real interpreters.
//!
//! Each test returns early when its interpreter is not installed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use code_sandbox_rs::prelude::*;
use code_sandbox_rs::sandbox::analysis::analyze;
use code_sandbox_rs::sandbox::artifacts::{ARTIFACTS_KEY, DATA_KEY};
use code_sandbox_rs::sandbox::runner::ProcessRunner;
use code_sandbox_rs::sandbox::wrapper::WrapperGenerator;
use code_sandbox_rs::{DependencySet, PackageInstaller};
use serde_json::{json, Value};

fn available(program: &str) -> bool {
    let found = which::which(program).is_ok();
    if !found {
        eprintln!("skipping: {} not found", program);
    }
    found
}

fn test_config() -> SandboxConfig {
    SandboxConfig::builder()
        .default_time_limit(Duration::from_secs(15))
        .auto_install(false)
        .build()
}

fn python_sandbox() -> Option<CodeSandbox> {
    available("python3").then(|| CodeSandbox::new(test_config()).unwrap())
}

fn node_sandbox() -> Option<CodeSandbox> {
    available("node").then(|| CodeSandbox::new(test_config()).unwrap())
}

async fn value_of(sandbox: &CodeSandbox, request: ExecutionRequest) -> Value {
    match sandbox.execute(request).await {
        ExecutionOutcome::Success(success) => success.value,
        failure => panic!("expected success, got {:?}", failure),
    }
}

#[tokio::test]
async fn test_python_no_arguments() {
    let Some(sandbox) = python_sandbox() else { return };
    let value = value_of(&sandbox, ExecutionRequest::python("def main(): return 'ok'")).await;
    assert_eq!(value, json!("ok"));
}

#[tokio::test]
async fn test_python_variable_bag() {
    let Some(sandbox) = python_sandbox() else { return };
    let request = ExecutionRequest::python("def main(variables):\n    return variables.get('x')")
        .with_variable("x", 5);
    assert_eq!(value_of(&sandbox, request).await, json!(5));
}

#[tokio::test]
async fn test_python_named_parameters() {
    let Some(sandbox) = python_sandbox() else { return };
    let request = ExecutionRequest::python("def main(a, b=10, *, scale=1):\n    return (a + b) * scale")
        .with_variable("a", 1)
        .with_variable("scale", 3)
        .with_variable("unused", "ignored");
    assert_eq!(value_of(&sandbox, request).await, json!(33));
}

#[tokio::test]
async fn test_python_variables_round_trip() {
    let Some(sandbox) = python_sandbox() else { return };
    let values = json!({
        "int": -42,
        "big": 12345678901234567890u64,
        "float": 0.1,
        "text": "quote \" backslash \\ newline \n tab \t 中文 ✓",
        "flag": true,
        "nothing": null,
        "nested": {"list": [1, [2, [3]], {"k": false}], "empty": {}, "blank": []}
    });
    let Value::Object(variables) = values.clone() else { unreachable!() };
    let code = "def main(variables):\n    return {'bag': variables, 'direct': [int, big, float, text, flag, nothing, nested]}";
    let request = ExecutionRequest::python(code).with_variables(variables);
    let value = value_of(&sandbox, request).await;
    assert_eq!(value["bag"], values);
    assert_eq!(value["direct"][3], values["text"]);
    assert_eq!(value["direct"][6], values["nested"]);
}

#[tokio::test]
async fn test_python_logs_and_async_main() {
    let Some(sandbox) = python_sandbox() else { return };
    let code = "import asyncio\nasync def main():\n    print('working')\n    await asyncio.sleep(0)\n    return (1, 2)";
    match sandbox.execute(ExecutionRequest::python(code)).await {
        ExecutionOutcome::Success(success) => {
            assert_eq!(success.value, json!([1, 2]));
            assert_eq!(success.logs, "working\n");
        }
        failure => panic!("expected success, got {:?}", failure),
    }
}

#[tokio::test]
async fn test_python_runtime_error() {
    let Some(sandbox) = python_sandbox() else { return };
    let outcome = sandbox
        .execute(ExecutionRequest::python("def main():\n    return 1 / 0"))
        .await;
    let response = outcome.to_response();
    assert!(!response.success);
    assert_eq!(response.error_kind, Some(ErrorKind::RuntimeError));
    assert!(response.message.unwrap().contains("ZeroDivisionError"));
}

#[tokio::test]
async fn test_python_missing_main_and_syntax_error() {
    let Some(sandbox) = python_sandbox() else { return };
    let outcome = sandbox.execute(ExecutionRequest::python("x = 1")).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::RuntimeError));

    let err = sandbox
        .try_execute(ExecutionRequest::python("def main(:\n    return 1"))
        .await
        .unwrap_err();
    match err {
        SandboxError::Runtime { exception_type, .. } => assert_eq!(exception_type, "SyntaxError"),
        other => panic!("expected syntax error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_python_module_level_error() {
    let Some(sandbox) = python_sandbox() else { return };
    let code = "raise ValueError('bad setup')\ndef main(): return 1";
    match sandbox.try_execute(ExecutionRequest::python(code)).await {
        Err(SandboxError::Runtime {
            exception_type,
            message,
            ..
        }) => {
            assert_eq!(exception_type, "ValueError");
            assert_eq!(message, "bad setup");
        }
        other => panic!("expected runtime error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_python_timeout_kills_child() {
    if !available("python3") {
        return;
    }
    let config = test_config();
    let request = ExecutionRequest::python("import time\ndef main():\n    time.sleep(30)");
    let analysis = analyze(request.language, &request.code);
    let wrapper = WrapperGenerator::new(&config)
        .generate(&request, &analysis)
        .unwrap();

    let started = Instant::now();
    let output = ProcessRunner::new(&config)
        .run(wrapper, Duration::from_millis(500))
        .await
        .unwrap();
    assert!(output.timed_out);
    assert!(started.elapsed() < Duration::from_secs(10));

    let pid = nix::unistd::Pid::from_raw(output.pid.unwrap() as i32);
    assert!(nix::sys::signal::kill(pid, None).is_err(), "child is still running");
}

#[tokio::test]
async fn test_timeout_outcome() {
    let Some(sandbox) = python_sandbox() else { return };
    let request = ExecutionRequest::python("def main():\n    while True:\n        pass")
        .with_time_limit(Duration::from_millis(300));
    let outcome = sandbox.execute(request).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn test_idempotent_results() {
    let Some(sandbox) = python_sandbox() else { return };
    let request = ExecutionRequest::python("def main(n):\n    return sorted(str(i) for i in range(n))")
        .with_variable("n", 12);
    let first = value_of(&sandbox, request.clone()).await;
    let second = value_of(&sandbox, request).await;
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_executions_are_isolated() {
    let Some(sandbox) = python_sandbox() else { return };
    let sandbox = Arc::new(sandbox);
    let mut handles = Vec::new();
    for i in 0..6 {
        let sandbox = sandbox.clone();
        handles.push(tokio::spawn(async move {
            let request = ExecutionRequest::python("state = []\ndef main(i):\n    state.append(i)\n    return state")
                .with_variable("i", i);
            (i, sandbox.execute(request).await)
        }));
    }
    for handle in handles {
        let (i, outcome) = handle.await.unwrap();
        assert_eq!(outcome.value(), Some(&json!([i])));
    }
}

#[tokio::test]
async fn test_python_figure_artifacts() {
    let Some(sandbox) = python_sandbox() else { return };
    let code = "import matplotlib.pyplot as plt\ndef main():\n    plt.plot([1, 2, 3])\n    plt.title('标题')\n    return {'points': 3}";
    let success = match sandbox.execute(ExecutionRequest::python(code)).await {
        ExecutionOutcome::Success(success) => success,
        failure => {
            eprintln!("skipping: matplotlib unavailable ({:?})", failure);
            return;
        }
    };
    assert_eq!(success.value["points"], json!(3));
    assert_eq!(success.artifacts.len(), 1);
    let png = success.artifacts[0].decode().unwrap();
    assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
}

/// A pyplot stand-in whose figures save a four-byte PNG signature.
const STUB_PYPLOT: &str = r#"
_figures = []


class _Figure:
    def __init__(self, broken):
        self.broken = broken

    def savefig(self, buffer, **kwargs):
        if self.broken:
            raise RuntimeError("renderer unavailable")
        buffer.write(b"\x89PNG")


def plot(*args, broken=False, **kwargs):
    _figures.append(_Figure(broken))


def get_fignums():
    return list(range(1, len(_figures) + 1))


def figure(number):
    return _figures[number - 1]


def close(which):
    _figures.clear()
"#;

#[tokio::test]
async fn test_python_artifact_contract() {
    if !available("python3") {
        return;
    }
    let packages = tempfile::tempdir().unwrap();
    let stub = packages.path().join("python").join("matplotlib");
    std::fs::create_dir_all(&stub).unwrap();
    std::fs::write(stub.join("__init__.py"), "def use(backend):\n    pass\n").unwrap();
    std::fs::write(stub.join("pyplot.py"), STUB_PYPLOT).unwrap();

    let config = SandboxConfig::builder()
        .default_time_limit(Duration::from_secs(15))
        .auto_install(false)
        .packages_dir(packages.path())
        .build();
    let sandbox = CodeSandbox::new(config).unwrap();
    let png = "data:image/png;base64,iVBORw==";

    // A non-object result is wrapped next to the artifacts.
    let code = "import matplotlib.pyplot as plt\ndef main():\n    plt.plot([1, 2])\n    return 7";
    let success = match sandbox.execute(ExecutionRequest::python(code)).await {
        ExecutionOutcome::Success(success) => success,
        failure => panic!("expected success, got {:?}", failure),
    };
    assert_eq!(success.value[DATA_KEY], json!(7));
    assert_eq!(success.value[ARTIFACTS_KEY], json!([png]));
    assert_eq!(success.artifacts.len(), 1);
    assert_eq!(success.artifacts[0].decode().unwrap(), b"\x89PNG");

    // An object result keeps its keys and gains the artifacts after its own.
    let code = "import matplotlib.pyplot as plt\ndef main():\n    plt.plot([1])\n    return {'n': 1, 'artifacts': ['note']}";
    let value = value_of(&sandbox, ExecutionRequest::python(code)).await;
    assert_eq!(value, json!({"n": 1, "artifacts": ["note", png]}));

    // A figure that fails to render is dropped; the value still comes back.
    let code = "import matplotlib.pyplot as plt\ndef main():\n    plt.plot([1], broken=True)\n    return 7";
    assert_eq!(value_of(&sandbox, ExecutionRequest::python(code)).await, json!(7));

    // No open figures means no wrapping.
    let code = "import matplotlib.pyplot as plt\ndef main():\n    return [7]";
    assert_eq!(value_of(&sandbox, ExecutionRequest::python(code)).await, json!([7]));
}

#[tokio::test]
async fn test_json_contract() {
    let Some(sandbox) = python_sandbox() else { return };
    let response = sandbox
        .execute_json(r#"{"code": "def main(variables): return variables", "variables": null, "timeLimitMs": 5000}"#)
        .await;
    assert!(response.success);
    assert_eq!(response.result, Some(json!({})));

    let response = sandbox.execute_json(r#"{"code": ""}"#).await;
    assert_eq!(response.error_kind, Some(ErrorKind::InvalidRequest));
}

#[tokio::test]
async fn test_javascript_conventions() {
    let Some(sandbox) = node_sandbox() else { return };
    let request = ExecutionRequest::javascript("function main() { return 'ok'; }");
    assert_eq!(value_of(&sandbox, request).await, json!("ok"));

    let request = ExecutionRequest::javascript("function main(variables) { return variables.x * 2; }")
        .with_variable("x", 21);
    assert_eq!(value_of(&sandbox, request).await, json!(42));

    let request = ExecutionRequest::javascript("const main = async (a, b) => [a, b ?? 'missing'];")
        .with_variable("a", "first");
    assert_eq!(value_of(&sandbox, request).await, json!(["first", "missing"]));

    let request = ExecutionRequest::javascript("function main({ x, y }) { return x + y; }")
        .with_variable("x", 2)
        .with_variable("y", 3);
    assert_eq!(value_of(&sandbox, request).await, json!(5));
}

#[tokio::test]
async fn test_javascript_errors_and_timeout() {
    let Some(sandbox) = node_sandbox() else { return };
    let outcome = sandbox
        .execute(ExecutionRequest::javascript("function main() { throw new TypeError('nope'); }"))
        .await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::RuntimeError));

    let request = ExecutionRequest::javascript("function main() { while (true) {} }")
        .with_time_limit(Duration::from_millis(300));
    assert_eq!(
        sandbox.execute(request).await.error_kind(),
        Some(ErrorKind::Timeout)
    );
}

#[tokio::test]
async fn test_javascript_logs_do_not_corrupt_result() {
    let Some(sandbox) = node_sandbox() else { return };
    let code = "function main() { console.log('a'); process.stdout.write('b\\n'); return 1; }";
    match sandbox.execute(ExecutionRequest::javascript(code)).await {
        ExecutionOutcome::Success(success) => {
            assert_eq!(success.value, json!(1));
            assert!(success.logs.contains('a') && success.logs.contains('b'));
        }
        failure => panic!("expected success, got {:?}", failure),
    }
}

#[tokio::test]
async fn test_variables_may_shadow_builtins() {
    if let Some(sandbox) = python_sandbox() {
        let request = ExecutionRequest::python("def main():\n    return [list, dict, Exception]")
            .with_variable("list", json!([1]))
            .with_variable("dict", "d")
            .with_variable("Exception", 3);
        assert_eq!(value_of(&sandbox, request).await, json!([[1], "d", 3]));
    }
    if let Some(sandbox) = node_sandbox() {
        let request = ExecutionRequest::javascript("function main() { return [JSON, Error, String]; }")
            .with_variable("JSON", 1)
            .with_variable("Error", "e")
            .with_variable("String", Value::Null);
        assert_eq!(value_of(&sandbox, request).await, json!([1, "e", null]));
    }
}

/// Reports every module missing and fails every install.
#[derive(Default)]
struct BrokenInstaller {
    installs: Mutex<Vec<String>>,
}

#[async_trait]
impl PackageInstaller for BrokenInstaller {
    async fn find_missing(&self, _language: Language, modules: &[String]) -> Result<Vec<String>> {
        Ok(modules.to_vec())
    }

    async fn install(&self, _language: Language, package: &str, _timeout: Duration) -> Result<()> {
        self.installs.lock().unwrap().push(package.to_string());
        Err(SandboxError::Config(format!("no distribution for {}", package)))
    }
}

#[tokio::test]
async fn test_failed_install_surfaces_as_dependency_failure() {
    if !available("python3") {
        return;
    }
    let installer = Arc::new(BrokenInstaller::default());
    let dependencies = Arc::new(DependencySet::new());
    let config = SandboxConfig::builder().auto_install(true).build();
    let options = SandboxOptions::default()
        .with_installer(installer.clone())
        .with_dependencies(dependencies.clone());
    let sandbox = CodeSandbox::new_with_options(config, options).unwrap();

    let code = "import sandbox_missing_pkg_9f3\ndef main(): return 1";
    let outcome = sandbox.execute(ExecutionRequest::python(code)).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::DependencyInstallFailure), "{:?}", outcome);
    assert_eq!(*installer.installs.lock().unwrap(), vec!["sandbox_missing_pkg_9f3"]);
    assert!(dependencies.is_empty());

    // A failed install is not fatal when the code never reaches the import.
    let code = "def main():\n    if False:\n        import sandbox_missing_pkg_9f3\n    return 'fine'";
    assert_eq!(value_of(&sandbox, ExecutionRequest::python(code)).await, json!("fine"));
}

#[tokio::test]
async fn test_dependency_set_is_shared() {
    if !available("python3") {
        return;
    }
    struct PresentInstaller;

    #[async_trait]
    impl PackageInstaller for PresentInstaller {
        async fn find_missing(&self, _: Language, _: &[String]) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn install(&self, _: Language, _: &str, _: Duration) -> Result<()> {
            unreachable!("nothing is missing")
        }
    }

    let dependencies = Arc::new(DependencySet::new());
    let make = || {
        let options = SandboxOptions::default()
            .with_installer(Arc::new(PresentInstaller))
            .with_dependencies(dependencies.clone());
        CodeSandbox::new_with_options(SandboxConfig::default(), options).unwrap()
    };
    let (first, second) = (make(), make());

    // The lookup reports `json5x` present; the import itself never runs.
    let code = "def main():\n    return 1\nif False:\n    import json5x";
    assert_eq!(value_of(&first, ExecutionRequest::python(code)).await, json!(1));
    assert!(second.dependencies().contains(Language::Python, "json5x"));
    let seen: HashSet<String> = dependencies.modules(Language::Python).into_iter().collect();
    assert!(seen.contains("json5x"));
}
