use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use rml_bridge::{BridgeValue, ModInfo};
use rml_core::{DataModelKind, OwnedImage, PermissionLevel, RmlError, Rva, Va};
use rml_hooks::{HookBackend, HookHandle};
use rml_sched::{JobKind, JobPriority, LambdaJob};
use rml_script::VmExecutor;

use super::*;

///////////////////////////////////////////////////////////////////////////////
// Fixtures
///////////////////////////////////////////////////////////////////////////////

/// A minimal 64-bit PE image with `.text`, `.rdata` and `.data` sections.
fn host_image() -> OwnedImage {
    let mut image = OwnedImage::zeroed(Va(0x1400000), 0x4000);

    image.write_bytes(Rva(0), b"MZ");
    image.write_u32(Rva(0x3C), 0x80);

    image.write_bytes(Rva(0x80), b"PE\0\0");
    image.write_bytes(Rva(0x84), &0x8664u16.to_le_bytes());
    image.write_bytes(Rva(0x86), &3u16.to_le_bytes());
    image.write_bytes(Rva(0x94), &0xF0u16.to_le_bytes());
    image.write_bytes(Rva(0x96), &0x0022u16.to_le_bytes());
    image.write_bytes(Rva(0x98), &0x020Bu16.to_le_bytes());

    let mut header = Rva(0x188);
    for (name, start, vsize) in [
        (b".text\0\0\0", 0x1000u32, 0x1000u32),
        (b".rdata\0\0", 0x2000, 0x1000),
        (b".data\0\0\0", 0x3000, 0x1000),
    ] {
        image.write_bytes(header, name);
        image.write_u32(header + 8, vsize);
        image.write_u32(header + 12, start);
        header += 40;
    }

    image
}

struct InertHandle {
    enabled: AtomicBool,
}

impl HookHandle for InertHandle {
    fn trampoline(&self) -> Va {
        Va(0)
    }

    unsafe fn enable(&self) -> Result<(), RmlError> {
        self.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    unsafe fn disable(&self) -> Result<(), RmlError> {
        self.enabled.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

struct InertBackend;

impl HookBackend for InertBackend {
    unsafe fn install(&self, _target: Va, _detour: Va) -> Result<Box<dyn HookHandle>, RmlError> {
        Ok(Box::new(InertHandle {
            enabled: AtomicBool::new(false),
        }))
    }
}

fn runtime() -> Runtime {
    Runtime::bootstrap(
        &host_image(),
        CoreConfig::default(),
        Arc::new(InertBackend),
        Arc::new(VmExecutor),
    )
    .unwrap()
}

///////////////////////////////////////////////////////////////////////////////
// Tests
///////////////////////////////////////////////////////////////////////////////

#[test]
fn bootstrap_builds_the_discovery_tables() {
    let runtime = runtime();

    assert!(runtime.sections().section(".text").is_some());
    assert!(runtime.sections().section(".rdata").is_some());

    // A bare image carries no type information and no host job classes.
    assert_eq!(runtime.rtti().len(), 0);
    assert!(runtime.job_kinds().is_empty());
}

#[test]
fn bootstrap_refuses_a_non_pe_image() {
    let image = OwnedImage::zeroed(Va(0x1000), 0x200);

    let result = Runtime::bootstrap(
        &image,
        CoreConfig::default(),
        Arc::new(InertBackend),
        Arc::new(VmExecutor),
    );

    assert!(matches!(result, Err(RmlError::InvalidImage(_))));
}

#[test]
fn queue_cap_comes_from_the_config() {
    let config = CoreConfig::from_toml("[core.performance]\nmax_queue_size = 2\n").unwrap();

    let runtime = Runtime::bootstrap(
        &host_image(),
        config,
        Arc::new(InertBackend),
        Arc::new(VmExecutor),
    )
    .unwrap();

    let engine = runtime.engines().engine_for(DataModelKind::Client);

    let handles: Vec<_> = (0..3)
        .map(|i| {
            engine.execute_script(
                "return 1",
                &format!("chunk-{i}"),
                PermissionLevel::None,
                script::ScriptPriority::Normal,
            )
        })
        .collect();

    let rejected = handles
        .iter()
        .filter_map(|handle| handle.try_wait())
        .filter(|result| result.error == Some(script::ScriptError::QueueFull))
        .count();

    assert_eq!(rejected, 1);
}

#[test]
fn engines_come_up_with_the_bridge_surface() {
    let runtime = runtime();
    let engine = runtime.engines().engine_for(DataModelKind::Client);

    let handle = engine.execute_script(
        "rml.bridge.set_data('attached', 1)",
        "trusted-setter",
        PermissionLevel::Full,
        script::ScriptPriority::Normal,
    );
    engine.scheduler().step();

    let result = handle.wait();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(
        runtime.bridge().get_data("attached"),
        BridgeValue::Number(1.0)
    );
}

#[test]
fn untrusted_scripts_are_denied_bridge_writes() {
    let runtime = runtime();
    let engine = runtime.engines().engine_for(DataModelKind::Client);

    for source in [
        "rml.bridge.set_data('secret', 1337)",
        "rml.bridge.register('pwn', function() end)",
    ] {
        let handle = engine.execute_script(
            source,
            "untrusted",
            PermissionLevel::None,
            script::ScriptPriority::Normal,
        );
        engine.scheduler().step();

        let result = handle.wait();
        assert!(!result.success);
        assert!(
            result.error_message().unwrap().contains("permission denied"),
            "{:?}",
            result.error
        );
    }

    assert!(runtime.bridge().get_data("secret").is_nil());
    assert!(runtime.bridge().function_list().is_empty());
}

#[test]
fn bridge_floor_comes_from_the_security_config() {
    let config =
        CoreConfig::from_toml("[core.security]\nallow_bridge_by_default = true\n").unwrap();

    let runtime = Runtime::bootstrap(
        &host_image(),
        config,
        Arc::new(InertBackend),
        Arc::new(VmExecutor),
    )
    .unwrap();

    let engine = runtime.engines().engine_for(DataModelKind::Client);
    let handle = engine.execute_script(
        "rml.bridge.set_data('open', 1)",
        "unstamped",
        PermissionLevel::None,
        script::ScriptPriority::Normal,
    );
    engine.scheduler().step();

    assert!(handle.wait().success);
    assert_eq!(runtime.bridge().get_data("open"), BridgeValue::Number(1.0));
}

#[test]
fn attached_mods_get_their_own_script_surface() {
    let runtime = runtime();

    let root = std::env::temp_dir().join(format!("rml-attach-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    std::fs::create_dir_all(root.join("scripts")).unwrap();
    std::fs::write(root.join("scripts/util.lua"), "return 11").unwrap();

    let info = ModInfo {
        name: "example".to_owned(),
        path: root.clone(),
        ..ModInfo::default()
    };
    let engine = runtime
        .attach_mod_scripts(DataModelKind::Server, &info)
        .unwrap();
    let lua = engine.context().lua();

    let name: String = lua.load("return rml.mod.get_name()").eval().unwrap();
    assert_eq!(name, "example");

    let value: f64 = lua.load("return require('@self/util')").eval().unwrap();
    assert_eq!(value, 11.0);

    // Detaching restores the framework identity.
    runtime
        .detach_mod_scripts(DataModelKind::Server, &info)
        .unwrap();
    let name: String = lua.load("return rml.mod.get_name()").eval().unwrap();
    assert_eq!(name, "rml");

    std::fs::remove_dir_all(&root).unwrap();
}

#[test]
fn uninstall_releases_everything_a_mod_registered() {
    let runtime = runtime();

    let mut handle = ModHandle::new(ModInfo {
        name: "example".to_owned(),
        ..ModInfo::default()
    });

    let job = runtime
        .scheduler()
        .register_job(Box::new(LambdaJob::new(
            "example-tick",
            JobPriority::Normal,
            JobKind::HEARTBEAT,
            |_| Ok(()),
        )))
        .unwrap();
    handle.jobs.push(job);

    runtime
        .bridge()
        .register_function("example", "ping", Box::new(|_| Ok(vec![])));

    assert_eq!(runtime.scheduler().get_job_count(), 1);
    assert_eq!(runtime.bridge().function_list().len(), 1);

    runtime.uninstall_mod(handle);

    assert_eq!(runtime.scheduler().get_job_count(), 0);
    assert!(runtime.bridge().function_list().is_empty());
    assert_eq!(runtime.bridge().get_data("anything"), BridgeValue::Nil);
}

#[test]
fn shutdown_stops_jobs_and_engines() {
    let runtime = runtime();

    runtime.engines().engine_for(DataModelKind::Server);
    assert_eq!(runtime.engines().len(), 1);

    runtime.shutdown();

    assert!(runtime.scheduler().is_shutting_down());
    assert!(runtime.engines().is_empty());
}
