//! Compile caching, sharing and reload behaviour over an in-memory repository.

mod common;

use std::sync::Arc;

use common::{export, memory_runtime, number};
use tern_runtime::repository::{Repository, Trackable};
use tern_runtime::{
    CacheRetention, CompileMode, EvalContext, ReloadableScript, RuntimeConfig, RuntimeError,
    Value,
};

#[test]
fn test_get_script_compiles_once() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::default());
    let resource = repo.set_source("a.js", "module.exports.value = 1");

    runtime.get_script(resource.clone()).unwrap();
    runtime.get_script(resource).unwrap();
    assert_eq!(engine.compiles("a.js"), 1);
}

#[test]
fn test_changed_source_is_recompiled() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::default());
    let resource = repo.set_source("a.js", "module.exports.value = 1");
    runtime.get_script(resource.clone()).unwrap();

    repo.set_source("a.js", "module.exports.value = 2");
    runtime.get_script(resource).unwrap();
    assert_eq!(engine.compiles("a.js"), 2);
}

#[test]
fn test_compile_failure_is_sticky() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::default());
    let resource = repo.set_source("bad.js", "module.exports.value = 1\nthis is not valid");
    let mut ctx = runtime.context();

    for _ in 0..2 {
        let err = runtime.get_script_in(&mut ctx, resource.clone()).unwrap_err();
        assert!(matches!(err, RuntimeError::Compile { .. }));
        assert_eq!(err.syntax_errors().len(), 1);
    }
    assert_eq!(engine.compiles("bad.js"), 1);
    // Errors are reported to the context on every call.
    assert_eq!(ctx.errors().len(), 2);
    assert_eq!(
        ctx.errors()[0].to_string(),
        "memory:app/bad.js:2:1: unrecognized statement\nthis is not valid\n^"
    );

    repo.set_source("bad.js", "module.exports.value = 1");
    runtime.get_script(resource).unwrap();
    assert_eq!(engine.compiles("bad.js"), 2);
}

#[test]
fn test_shared_scope_is_reused_across_contexts() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::default());
    repo.set_source("s.js", "module.shared = true\nmodule.exports.value = 1");

    let first = runtime.load("s").unwrap();
    let second = runtime.load("s").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(engine.executions("s.js"), 1);
    assert!(runtime.shared_script(first.path()).is_some());
}

#[test]
fn test_unshared_module_is_evaluated_per_context() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::default());
    repo.set_source("n.js", "module.exports.value = 1");

    let first = runtime.load("n").unwrap();
    let second = runtime.load("n").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(engine.executions("n.js"), 2);
    assert_eq!(engine.compiles("n.js"), 1);
    assert!(runtime.shared_script(first.path()).is_none());
}

#[test]
fn test_same_context_returns_same_scope() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::default());
    repo.set_source("n.js", "module.exports.value = 1");

    let mut ctx = runtime.context();
    let first = runtime.load_module(&mut ctx, "n", None).unwrap();
    let second = runtime.load_module(&mut ctx, "n.js", None).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(engine.executions("n.js"), 1);
}

#[test]
fn test_cyclic_requires_terminate() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::default());
    repo.set_source(
        "a.js",
        "module.exports.name = 'a'\nmodule.exports.b = require('./b')",
    );
    repo.set_source(
        "b.js",
        "module.exports.a = require('./a')\nmodule.exports.seen = require('./a').name",
    );

    let a = runtime.load("a").unwrap();
    let b_exports = export(&a, "b");
    assert_eq!(b_exports.get("a"), Some(a.exports()));
    assert_eq!(b_exports.get("seen"), Some(Value::from("a")));
    assert_eq!(engine.executions("a.js"), 1);
    assert_eq!(engine.executions("b.js"), 1);
}

#[test]
fn test_dependency_change_reevaluates_shared_module() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::default());
    repo.set_source(
        "s.js",
        "module.shared = true\nmodule.exports.value = require('./d').value",
    );
    repo.set_source("d.js", "module.exports.value = 1");

    let first = runtime.load("s").unwrap();
    assert_eq!(number(&first, "value"), 1.0);
    let script = runtime.shared_script(first.path()).unwrap();
    let before = script.checksum();

    repo.set_source("d.js", "module.exports.value = 5");
    assert_ne!(script.checksum(), before);

    let second = runtime.load("s").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(number(&second, "value"), 5.0);
    assert_eq!(engine.executions("s.js"), 2);
    assert_eq!(engine.compiles("s.js"), 1);
}

#[test]
fn test_shared_module_own_change_reevaluates_in_place() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::default());
    repo.set_source("s.js", "module.shared = true\nmodule.exports.value = 1");
    let first = runtime.load("s").unwrap();
    let old_exports = first.exports();

    repo.set_source("s.js", "module.shared = true\nmodule.exports.value = 2");
    let second = runtime.load("s").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_ne!(second.exports(), old_exports);
    assert_eq!(number(&second, "value"), 2.0);
    assert_eq!(engine.compiles("s.js"), 2);
}

#[test]
fn test_module_can_stop_being_shared() {
    let (repo, _engine, runtime) = memory_runtime(RuntimeConfig::default());
    let resource = repo.set_source("s.js", "module.shared = true\nmodule.exports.value = 1");
    runtime.load("s").unwrap();
    assert!(runtime.shared_script(resource.path()).is_some());

    repo.set_source("s.js", "module.exports.value = 2");
    let scope = runtime.load("s").unwrap();
    assert_eq!(number(&scope, "value"), 2.0);
    assert!(runtime.shared_script(resource.path()).is_none());
}

#[test]
fn test_main_module_is_always_shared() {
    let config = RuntimeConfig::new().main_module("app/main");
    let (repo, engine, runtime) = memory_runtime(config);
    repo.set_source("app/main.js", "module.exports.value = 1");

    let first = runtime.load("app/main").unwrap();
    assert_eq!(first.module_name(), "app/main");
    let script = runtime.shared_script(first.path()).unwrap();
    assert!(script.is_shared());

    let second = runtime.load("app/main").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(engine.executions("main.js"), 1);
}

#[test]
fn test_explicit_false_is_not_shared() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::default());
    repo.set_source("n.js", "module.shared = false\nmodule.exports.value = 1");
    runtime.load("n").unwrap();
    runtime.load("n").unwrap();
    assert_eq!(engine.executions("n.js"), 2);
}

#[test]
fn test_end_to_end_reload() {
    let (repo, _engine, runtime) = memory_runtime(RuntimeConfig::default());
    repo.set_source("a.js", "module.exports.value = 1");
    repo.set_source("b.js", "module.exports.value = require('./a').value + 1");

    let b = runtime.load("b").unwrap();
    assert_eq!(number(&b, "value"), 2.0);

    repo.set_source("a.js", "module.exports.value = 10");
    let b = runtime.load("b").unwrap();
    assert_eq!(number(&b, "value"), 11.0);
}

#[test]
fn test_relative_require_from_nested_repository() {
    let (repo, _engine, runtime) = memory_runtime(RuntimeConfig::default());
    repo.set_source("config.js", "module.exports.port = 8080");
    repo.set_source("lib/util.js", "module.exports.helper = 'util'");
    repo.set_source(
        "lib/server.js",
        "module.exports.port = require('../config').port\nmodule.exports.util = require('./util').helper",
    );

    let server = runtime.load("lib/server").unwrap();
    assert_eq!(number(&server, "port"), 8080.0);
    assert_eq!(export(&server, "util"), Value::from("util"));
}

#[test]
fn test_index_module_resolution() {
    let (repo, _engine, runtime) = memory_runtime(RuntimeConfig::default());
    repo.set_source("pkg/index.js", "module.exports.name = 'pkg'");
    let scope = runtime.load("pkg").unwrap();
    assert_eq!(export(&scope, "name"), Value::from("pkg"));
}

#[test]
fn test_missing_module_is_not_found() {
    let (repo, _engine, runtime) = memory_runtime(RuntimeConfig::default());
    assert!(runtime.load("missing").unwrap_err().is_not_found());

    repo.set_source("a.js", "require('./missing')");
    let err = runtime.load("a").unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {}", err);
}

#[test]
fn test_evaluation_failure_is_not_cached() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::default());
    let resource = repo.set_source("x.js", "module.shared = true\nthrow 'boom'");

    for _ in 0..2 {
        let err = runtime.load("x").unwrap_err();
        assert!(matches!(err, RuntimeError::Evaluation(_)));
        assert!(err.to_string().contains("boom"));
    }
    assert_eq!(engine.executions("x.js"), 2);
    assert_eq!(engine.compiles("x.js"), 1);
    assert!(runtime.shared_script(resource.path()).is_none());
}

#[test]
fn test_failed_reevaluation_does_not_leave_stale_shared_scope() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::default());
    repo.set_source(
        "s.js",
        "module.shared = true\nmodule.exports.value = require('./d').value",
    );
    repo.set_source("d.js", "module.exports.value = 1");
    runtime.load("s").unwrap();

    repo.set_source("d.js", "throw 'broken'");
    assert!(runtime.load("s").is_err());
    assert!(runtime.load("s").is_err());

    repo.set_source("d.js", "module.exports.value = 3");
    let scope = runtime.load("s").unwrap();
    assert_eq!(number(&scope, "value"), 3.0);
    assert_eq!(engine.executions("s.js"), 4);
}

#[test]
fn test_reload_disabled_keeps_first_evaluation() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::new().reload(false));
    repo.set_source("s.js", "module.shared = true\nmodule.exports.value = 1");
    repo.set_source("n.js", "module.exports.value = 1");
    let shared = runtime.load("s").unwrap();
    runtime.load("n").unwrap();

    repo.set_source("s.js", "module.shared = true\nmodule.exports.value = 2");
    repo.set_source("n.js", "module.exports.value = 2");

    let again = runtime.load("s").unwrap();
    assert!(Arc::ptr_eq(&shared, &again));
    assert_eq!(number(&again, "value"), 1.0);
    assert_eq!(number(&runtime.load("n").unwrap(), "value"), 1.0);
    assert_eq!(engine.total_compiles(), 2);
}

#[test]
fn test_exports_alias_and_replacement() {
    let (repo, _engine, runtime) = memory_runtime(RuntimeConfig::default());
    repo.set_source("alias.js", "exports.value = 1");
    repo.set_source("replace.js", "module.exports = 'whole'");

    assert_eq!(number(&runtime.load("alias").unwrap(), "value"), 1.0);
    assert_eq!(
        runtime.load("replace").unwrap().exports(),
        Value::from("whole")
    );
}

#[test]
fn test_dependencies_are_recorded_per_evaluation() {
    let (repo, _engine, runtime) = memory_runtime(RuntimeConfig::default());
    repo.set_source(
        "s.js",
        "module.shared = true\nrequire('./a')\nrequire('./b')\nrequire('./a')",
    );
    repo.set_source("a.js", "require('./c')");
    repo.set_source("b.js", "module.exports.value = 1");
    repo.set_source("c.js", "module.exports.value = 1");

    let scope = runtime.load("s").unwrap();
    let script = runtime.shared_script(scope.path()).unwrap();
    let names: Vec<_> = script
        .dependencies()
        .iter()
        .map(|d| d.module_name().to_string())
        .collect();
    assert_eq!(names, vec!["a", "b"]);

    let a = &script.dependencies()[0];
    assert_eq!(a.dependencies()[0].module_name(), "c");
}

#[test]
fn test_script_cache_serves_other_scripts() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::default());
    let resource = repo.set_source("a.js", "module.exports.value = 1");
    let unit = runtime.get_script(resource.clone()).unwrap();

    let mut ctx = EvalContext::new(CompileMode::Optimized);
    let other = ReloadableScript::new(resource.clone(), CompileMode::Optimized);
    let cached = other.get_script(&runtime, &mut ctx).unwrap();
    assert!(Arc::ptr_eq(&unit, &cached));
    assert_eq!(engine.compiles("a.js"), 1);

    let mut ctx = EvalContext::new(CompileMode::Interpreted);
    let interpreted = ReloadableScript::new(resource, CompileMode::Interpreted);
    interpreted.get_script(&runtime, &mut ctx).unwrap();
    assert_eq!(engine.compiles("a.js"), 2);
}

#[test]
fn test_interpreted_mode_bypasses_script_cache() {
    let config = RuntimeConfig::new().mode(CompileMode::Interpreted);
    let (repo, engine, runtime) = memory_runtime(config);
    repo.set_source("a.js", "module.exports.value = 1");

    runtime.load("a").unwrap();
    runtime.load("a").unwrap();
    assert_eq!(engine.compiles("a.js"), 1);
    assert!(runtime.script_cache().is_empty());
}

#[test]
fn test_weak_cache_forgets_dropped_units() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::default());
    let resource = repo.set_source("a.js", "module.exports.value = 1");
    let mut ctx = runtime.context();

    let script = ReloadableScript::new(resource.clone(), CompileMode::Optimized);
    script.get_script(&runtime, &mut ctx).unwrap();
    drop(script);
    assert!(runtime.script_cache().get(resource.path()).is_none());

    let script = ReloadableScript::new(resource, CompileMode::Optimized);
    script.get_script(&runtime, &mut ctx).unwrap();
    assert_eq!(engine.compiles("a.js"), 2);
}

#[test]
fn test_lru_cache_keeps_dropped_units() {
    let config = RuntimeConfig::new().cache(CacheRetention::Lru { capacity: 4 });
    let (repo, engine, runtime) = memory_runtime(config);
    let resource = repo.set_source("a.js", "module.exports.value = 1");
    let mut ctx = runtime.context();

    let script = ReloadableScript::new(resource.clone(), CompileMode::Optimized);
    script.get_script(&runtime, &mut ctx).unwrap();
    drop(script);

    let script = ReloadableScript::new(resource, CompileMode::Optimized);
    script.get_script(&runtime, &mut ctx).unwrap();
    assert_eq!(engine.compiles("a.js"), 1);
}

#[test]
fn test_clear_caches_forces_recompilation() {
    let (repo, engine, runtime) = memory_runtime(RuntimeConfig::default());
    repo.set_source("s.js", "module.shared = true\nmodule.exports.value = 1");
    let first = runtime.load("s").unwrap();

    runtime.clear_caches();
    let second = runtime.load("s").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(engine.compiles("s.js"), 2);
    assert!(repo.get_resource("s.js").exists());
}
