use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pretty_assertions::assert_eq;
use tether_modules::{
    BundleHost, ExportValue, Exports, Filter, ModuleDefinition, ModuleId, ModuleScope, WaitOptions,
};
use tether_plugin::{HookSet, InternalFlags, PluginFlags, PluginManifest, PluginState, Stage};
use tether_runtime::{Runtime, TetherConfig};

const CONFIG: &str = r#"
[plugins]
disabled = ["ads", "core"]
late = ["themes"]

[plugins.storage.notes]
pinned = "inbox"
"#;

fn editor_module(id: u32) -> ModuleDefinition {
    ModuleDefinition::with_exports(
        id,
        vec![],
        Exports::builder()
            .value("displayName", "Editor")
            .function("open", |args| {
                ExportValue::from(format!("opened {}", args.len()))
            })
            .build(),
    )
}

#[test]
fn plugins_find_modules_defined_after_boot() {
    let runtime = Runtime::new(TetherConfig::from_toml(CONFIG).unwrap()).unwrap();
    let host = BundleHost::new();
    runtime.attach(&host.entrypoint()).unwrap();

    let opened = Rc::new(RefCell::new(Vec::new()));
    let pinned = Rc::new(RefCell::new(None));

    let (o, p) = (Rc::clone(&opened), Rc::clone(&pinned));
    assert!(
        runtime
            .register(
                PluginManifest::new("notes", "Notes", "Opens the editor"),
                HookSet::new().on_start(move |ctx| {
                    *p.borrow_mut() = ctx.storage().get::<String>("pinned")?;
                    let o = Rc::clone(&o);
                    ctx.wait(
                        Filter::by_export_name("Editor"),
                        WaitOptions::default(),
                        move |found, _| {
                            o.borrow_mut().push(found.id);
                        },
                    )?;
                    Ok(())
                }),
                PluginFlags::ENABLED,
                InternalFlags::empty(),
            )
            .unwrap()
    );
    assert!(
        !runtime
            .register(
                PluginManifest::new("ads", "Ads", "Shows ads"),
                HookSet::new(),
                PluginFlags::ENABLED,
                InternalFlags::empty(),
            )
            .unwrap()
    );

    runtime.boot().unwrap();
    assert_eq!(pinned.borrow().as_deref(), Some("inbox"));
    assert!(opened.borrow().is_empty());

    let editor = runtime.modules().lazy_find(Filter::by_export_name("Editor"));
    assert_eq!(editor.property("open"), None);

    host.define(editor_module(42));
    assert!(opened.borrow().is_empty());
    host.require(ModuleId(42)).unwrap();
    assert_eq!(*opened.borrow(), vec![ModuleId(42)]);

    let result = editor.call_method("open", &[ExportValue::Null]).unwrap();
    assert_eq!(result.as_str(), Some("opened 1"));

    runtime.plugins().disable("notes").unwrap();
    host.define(editor_module(43));
    host.require(ModuleId(43)).unwrap();
    assert_eq!(*opened.borrow(), vec![ModuleId(42)]);
}

#[test]
fn essential_and_late_plugins_follow_config() {
    let runtime = Runtime::new(TetherConfig::from_toml(CONFIG).unwrap()).unwrap();
    let started = Rc::new(Cell::new(0));

    for (id, internal) in [
        ("core", InternalFlags::INTERNAL | InternalFlags::ESSENTIAL),
        ("themes", InternalFlags::empty()),
    ] {
        let s = Rc::clone(&started);
        runtime
            .register(
                PluginManifest::new(id, id, "config driven"),
                HookSet::new().on_start(move |_| {
                    s.set(s.get() + 1);
                    Ok(())
                }),
                PluginFlags::ENABLED,
                internal,
            )
            .unwrap();
    }

    runtime.boot().unwrap();
    assert_eq!(runtime.plugins().status("core"), Some(PluginState::Started));
    assert_eq!(runtime.plugins().status("themes"), Some(PluginState::Registered));
    assert_eq!(started.get(), 1);

    runtime.plugins().enable_late("themes").unwrap();
    assert_eq!(started.get(), 2);
    assert!(runtime.plugins().disable("core").is_err());
}

#[test]
fn a_failing_plugin_does_not_stop_boot() {
    let runtime = Runtime::new(TetherConfig::default()).unwrap();
    let host = BundleHost::new();
    runtime.attach(&host.entrypoint()).unwrap();

    runtime
        .register(
            PluginManifest::new("broken", "Broken", "Fails early"),
            HookSet::new().on_pre_init(|_| anyhow::bail!("missing dependency")),
            PluginFlags::ENABLED,
            InternalFlags::empty(),
        )
        .unwrap();
    let seen = Rc::new(Cell::new(false));
    let s = Rc::clone(&seen);
    runtime
        .register(
            PluginManifest::new("healthy", "Healthy", "Keeps going"),
            HookSet::new().on_init(move |ctx| {
                s.set(ctx.modules().lazy_wait(Filter::by_props(["ready"])).is_ok());
                Ok(())
            }),
            PluginFlags::ENABLED,
            InternalFlags::empty(),
        )
        .unwrap();

    let reports = runtime.boot().unwrap();
    assert_eq!(reports[0].stage, Stage::PreInit);
    assert_eq!(reports[0].failed, vec!["broken"]);
    assert!(seen.get());
    assert_eq!(runtime.plugins().status("broken"), Some(PluginState::Disabled));
    assert_eq!(runtime.plugins().status("healthy"), Some(PluginState::Started));

    let report = runtime.shutdown();
    assert_eq!(report.succeeded, vec!["healthy"]);
}
