//! Live enable/disable of instrumentation groups and exclusion handling

mod common;

use common::{call_original, init_test_logging, sentinel_descriptor, start_agent, unit, SENTINEL};
use pretty_assertions::assert_eq;
use serde_json::json;
use spanhook_core::matcher::{name_starts_with, named, Predicate};
use spanhook_core::{AgentConfig, HostProcess, InstrumentationDescriptor};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn test_disable_and_reenable_group_without_restart() {
    init_test_logging();
    let host = HostProcess::new();
    let point = host.load_unit(unit("com.acme.Greeter", "greet"));
    let (agent, _) = start_agent(
        AgentConfig::default(),
        &host,
        vec![sentinel_descriptor("greeter", "g", "com.acme.Greeter")],
    );

    assert_eq!(call_original(&point), json!(SENTINEL));

    let report = agent
        .reconfigure(AgentConfig {
            disabled_instrumentations: vec!["g".to_string()],
            ..AgentConfig::default()
        })
        .unwrap();
    assert_eq!(report.retracted, 1);
    assert_eq!(call_original(&point), json!(""));

    let report = agent.reconfigure(AgentConfig::default()).unwrap();
    assert_eq!(report.instrumented, 1);
    assert_eq!(call_original(&point), json!(SENTINEL));
}

#[test]
fn test_incubating_disables_experimental_group() {
    init_test_logging();
    let host = HostProcess::new();
    let point = host.load_unit(unit("com.acme.Greeter", "greet"));
    let (agent, _) = start_agent(
        AgentConfig::default(),
        &host,
        vec![sentinel_descriptor("greeter", "experimental", "com.acme.Greeter")],
    );
    assert_eq!(call_original(&point), json!(SENTINEL));

    agent
        .reconfigure(AgentConfig {
            disabled_instrumentations: vec!["incubating".to_string()],
            ..AgentConfig::default()
        })
        .unwrap();
    assert_eq!(call_original(&point), json!(""));
}

#[test]
fn test_instrument_false_turns_everything_off() {
    init_test_logging();
    let host = HostProcess::new();
    let point = host.load_unit(unit("com.acme.Greeter", "greet"));
    let (agent, _) = start_agent(
        AgentConfig {
            instrument: false,
            ..AgentConfig::default()
        },
        &host,
        vec![sentinel_descriptor("greeter", "g", "com.acme.Greeter")],
    );

    assert_eq!(call_original(&point), json!(""));
    assert!(agent.controller().active_descriptors().is_empty());

    let late = host.load_unit(unit("com.acme.Greeter", "wave"));
    assert_eq!(call_original(&late), json!(""));
}

#[test]
fn test_user_and_default_exclusions_veto_matches() {
    init_test_logging();
    let host = HostProcess::new();
    let excluded = host.load_unit(unit("com.acme.internal.Cache", "get"));
    let proxy = host.load_unit(unit("com.acme.Service$$EnhancerByCGLIB", "get"));
    let kept = host.load_unit(unit("com.acme.Service", "get"));

    let everything = InstrumentationDescriptor::builder("everything")
        .prefilter(name_starts_with("com.acme"))
        .type_matcher(Predicate::any())
        .on_exit(|frame| {
            frame.set_return_value(json!(SENTINEL));
            Ok(())
        })
        .build();
    let (agent, _) = start_agent(
        AgentConfig {
            classes_excluded_from_instrumentation: vec!["com.acme.internal.*".to_string()],
            ..AgentConfig::default()
        },
        &host,
        vec![everything],
    );

    assert_eq!(call_original(&excluded), json!(""));
    assert_eq!(call_original(&proxy), json!(""));
    assert_eq!(call_original(&kept), json!(SENTINEL));

    // exclusions are part of the live configuration too
    agent
        .reconfigure(AgentConfig {
            classes_excluded_from_instrumentation: vec!["*.Service".to_string()],
            ..AgentConfig::default()
        })
        .unwrap();
    assert_eq!(call_original(&excluded), json!(SENTINEL));
    assert_eq!(call_original(&kept), json!(""));
}

#[test]
fn test_default_off_descriptor_needs_opt_in() {
    init_test_logging();
    let host = HostProcess::new();
    let point = host.load_unit(unit("com.acme.Greeter", "greet"));
    let opt_in = InstrumentationDescriptor::builder("greeter")
        .type_matcher(named("com.acme.Greeter"))
        .group("experimental")
        .enabled_by_default(false)
        .on_exit(|frame| {
            frame.set_return_value(json!(SENTINEL));
            Ok(())
        })
        .build();
    let (agent, _) = start_agent(AgentConfig::default(), &host, vec![opt_in]);
    assert_eq!(call_original(&point), json!(""));

    agent
        .reconfigure(AgentConfig {
            enable_instrumentations: vec!["experimental".to_string()],
            ..AgentConfig::default()
        })
        .unwrap();
    assert_eq!(call_original(&point), json!(SENTINEL));
}

#[test]
fn test_ensure_instrumented_targets_one_type() {
    init_test_logging();
    let host = HostProcess::new();
    let greeter = host.load_unit(unit("com.acme.Greeter", "greet"));
    let (agent, _) = start_agent(AgentConfig::default(), &host, Vec::new());
    assert_eq!(call_original(&greeter), json!(""));

    let descriptor = sentinel_descriptor("greeter", "g", "com.acme.Greeter");
    let report = agent.ensure_instrumented("com.acme.Greeter", &[descriptor.clone()]);
    assert_eq!(report.instrumented, 1);
    assert_eq!(call_original(&greeter), json!(SENTINEL));

    // already registered and active: nothing to do
    let again = agent.ensure_instrumented("com.acme.Greeter", &[descriptor]);
    assert_eq!(again.instrumented, 0);
    assert_eq!(again.unchanged, 1);
    assert_eq!(agent.controller().registry().len(), 1);
}

#[test]
fn test_re_init_instrumentation_registers_late_descriptors() {
    init_test_logging();
    let host = HostProcess::new();
    let point = host.load_unit(unit("com.acme.Greeter", "greet"));
    let (agent, _) = start_agent(AgentConfig::default(), &host, Vec::new());

    let report = agent
        .re_init_instrumentation(vec![sentinel_descriptor("greeter", "g", "com.acme.Greeter")])
        .unwrap();
    assert_eq!(report.instrumented, 1);
    assert_eq!(call_original(&point), json!(SENTINEL));

    // registering the same descriptor again must not stack a second hook
    agent
        .re_init_instrumentation(vec![sentinel_descriptor("greeter", "g", "com.acme.Greeter")])
        .unwrap();
    assert_eq!(point.installed_descriptor_names(), ["greeter"]);
}

#[test]
fn test_ensure_registered_applies_immediately() {
    init_test_logging();
    let host = HostProcess::new();
    let point = host.load_unit(unit("com.acme.Greeter", "greet"));
    let (agent, _) = start_agent(AgentConfig::default(), &host, Vec::new());

    let descriptor = sentinel_descriptor("greeter", "g", "com.acme.Greeter");
    let report = agent.controller().ensure_registered(descriptor.clone());
    assert_eq!(report.instrumented, 1);
    assert_eq!(call_original(&point), json!(SENTINEL));

    let again = agent.controller().ensure_registered(descriptor);
    assert_eq!(again.instrumented, 0);
}

#[test]
fn test_ensure_instrumented_activation_reaches_other_loaded_types() {
    init_test_logging();
    let host = HostProcess::new();
    let greeter = host.load_unit(unit("com.acme.Greeter", "greet"));
    let mailer = host.load_unit(unit("com.acme.Mailer", "send"));
    let (agent, _) = start_agent(AgentConfig::default(), &host, Vec::new());

    let acme = InstrumentationDescriptor::builder("acme")
        .type_matcher(name_starts_with("com.acme."))
        .on_exit(|frame| {
            frame.set_return_value(json!(SENTINEL));
            Ok(())
        })
        .build();
    let report = agent.ensure_instrumented("com.acme.Greeter", &[acme.clone()]);

    assert_eq!(report.instrumented, 2);
    assert!(agent.controller().is_active("acme"));
    assert_eq!(call_original(&greeter), json!(SENTINEL));
    assert_eq!(call_original(&mailer), json!(SENTINEL));

    // already active: only the named type is looked at again
    let again = agent.ensure_instrumented("com.acme.Mailer", &[acme]);
    assert_eq!(again.unchanged, 1);
    assert_eq!(again.instrumented, 0);
}

#[test]
fn test_calls_see_one_advice_generation_while_toggling() {
    init_test_logging();
    let host = HostProcess::new();
    let point = host.load_unit(unit("com.acme.Greeter", "greet"));
    let unpaired_exits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&unpaired_exits);
    let paired = InstrumentationDescriptor::builder("paired")
        .type_matcher(named("com.acme.Greeter"))
        .group("g")
        .on_enter(|frame| {
            frame.set_local(true);
            Ok(())
        })
        .on_exit(move |frame| {
            if frame.take_local::<bool>().is_none() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            frame.set_return_value(json!(SENTINEL));
            Ok(())
        })
        .build();
    let (agent, _) = start_agent(AgentConfig::default(), &host, vec![paired]);
    let disabled = AgentConfig {
        disabled_instrumentations: vec!["g".to_string()],
        ..AgentConfig::default()
    };

    let done = AtomicBool::new(false);
    let (calls, unexpected) = thread::scope(|s| {
        let caller = s.spawn(|| {
            let mut calls = 0usize;
            let mut unexpected = Vec::new();
            while !done.load(Ordering::SeqCst) || calls < 100 {
                let result = call_original(&point);
                if result != json!("") && result != json!(SENTINEL) {
                    unexpected.push(result);
                }
                calls += 1;
            }
            (calls, unexpected)
        });

        for _ in 0..50 {
            agent.reconfigure(disabled.clone()).unwrap();
            agent.reconfigure(AgentConfig::default()).unwrap();
        }
        done.store(true, Ordering::SeqCst);
        caller.join().unwrap()
    });

    assert!(calls >= 100);
    assert!(unexpected.is_empty(), "unexpected results: {unexpected:?}");
    assert_eq!(unpaired_exits.load(Ordering::SeqCst), 0);
    assert_eq!(call_original(&point), json!(SENTINEL));
}
