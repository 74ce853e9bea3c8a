use std::path::PathBuf;

use anyhow::Result;

use frida_compile::watch::{WatchSession, WatchState};
use frida_compile::{FsEvent, MemorySystem, Options, WatchNotification};

fn options() -> Options {
    Options::new("/p/agent/index.ts", "/p", "/opt/frida-compile")
}

fn greeter_project() -> MemorySystem {
    let sys = MemorySystem::new();
    sys.add_file(
        "/p/agent/index.ts",
        "import { greet } from \"./greet\";\ngreet(\"world\");\n",
    );
    sys.add_file(
        "/p/agent/greet.ts",
        "export function greet(n: string) { return \"Hello, \" + n; }\n",
    );
    sys
}

#[derive(Default)]
struct Log {
    started: usize,
    finished: usize,
    updated: usize,
    diagnostics: usize,
}

impl Log {
    fn sink<'a>(&'a mut self) -> impl FnMut(WatchNotification) + 'a {
        move |notification| match notification {
            WatchNotification::CompilationStarting => self.started += 1,
            WatchNotification::CompilationFinished => self.finished += 1,
            WatchNotification::BundleUpdated(_) => self.updated += 1,
            WatchNotification::Diagnostic(_) => self.diagnostics += 1,
        }
    }
}

#[test]
fn initial_pass_emits_one_bundle() -> Result<()> {
    let sys = greeter_project();
    let mut session = WatchSession::new(&sys, options());
    let mut log = Log::default();
    session.start(&mut log.sink());

    assert_eq!(log.started, 1);
    assert_eq!(log.finished, 1);
    assert_eq!(log.updated, 1);
    assert_eq!(session.state(), WatchState::Idle);
    assert!(session.previous_bundle().is_some());

    let watched = sys.watched();
    assert!(watched.contains(&"/p/agent/index.ts".to_string()));
    assert!(watched.contains(&"/p/agent/greet.ts".to_string()));
    Ok(())
}

#[test]
fn identical_passes_suppress_bundle_updates() -> Result<()> {
    let sys = greeter_project();
    let mut session = WatchSession::new(&sys, options());
    let mut log = Log::default();
    session.start(&mut log.sink());

    // A change event without a content change reruns the pass but emits no
    // new bundle.
    sys.push_event(FsEvent::Changed(PathBuf::from("/p/agent/greet.ts")));
    session.pump(&mut log.sink());

    assert_eq!(log.started, 2);
    assert_eq!(log.finished, 2);
    assert_eq!(log.updated, 1);
    Ok(())
}

#[test]
fn content_changes_produce_a_new_bundle() -> Result<()> {
    let sys = greeter_project();
    let mut session = WatchSession::new(&sys, options());
    let mut log = Log::default();
    session.start(&mut log.sink());
    let first = session.previous_bundle().cloned();

    sys.add_file(
        "/p/agent/greet.ts",
        "export function greet(n: string) { return \"Hi, \" + n; }\n",
    );
    sys.push_event(FsEvent::Changed(PathBuf::from("/p/agent/greet.ts")));
    session.pump(&mut log.sink());

    assert_eq!(log.updated, 2);
    assert_ne!(session.previous_bundle().cloned(), first);
    Ok(())
}

#[test]
fn bursts_of_events_run_a_single_pass() -> Result<()> {
    let sys = greeter_project();
    let mut session = WatchSession::new(&sys, options());
    let mut log = Log::default();
    session.start(&mut log.sink());

    for _ in 0..3 {
        sys.push_event(FsEvent::Changed(PathBuf::from("/p/agent/greet.ts")));
    }
    session.pump(&mut log.sink());

    assert_eq!(log.started, 2, "three events should coalesce into one pass");
    Ok(())
}

#[test]
fn failures_keep_the_previous_bundle() -> Result<()> {
    let sys = greeter_project();
    let mut session = WatchSession::new(&sys, options());
    let mut log = Log::default();
    session.start(&mut log.sink());
    let first = session.previous_bundle().cloned();
    assert!(first.is_some());

    sys.add_file("/p/agent/greet.ts", "export function greet( {\n");
    sys.push_event(FsEvent::Changed(PathBuf::from("/p/agent/greet.ts")));
    session.pump(&mut log.sink());

    assert_eq!(log.updated, 1, "a failed pass must not emit a bundle");
    assert!(log.diagnostics > 0, "the parse error should be reported");
    assert_eq!(log.finished, 2, "compilationFinished fires even on failure");
    assert_eq!(session.previous_bundle().cloned(), first);
    Ok(())
}

#[test]
fn external_sources_are_watched() -> Result<()> {
    let sys = MemorySystem::new();
    sys.add_file(
        "/p/agent/index.ts",
        "import { x } from \"dep\";\nconsole.log(x);\n",
    );
    sys.add_file(
        "/p/node_modules/dep/package.json",
        r#"{"name": "dep", "type": "module", "main": "index.js"}"#,
    );
    sys.add_file("/p/node_modules/dep/index.js", "export const x = 1;\n");

    let mut session = WatchSession::new(&sys, options());
    let mut log = Log::default();
    session.start(&mut log.sink());
    assert!(sys
        .watched()
        .contains(&"/p/node_modules/dep/index.js".to_string()));

    // Changing the external file invalidates its cached parse and reruns.
    sys.add_file("/p/node_modules/dep/index.js", "export const x = 2;\n");
    sys.push_event(FsEvent::Changed(PathBuf::from(
        "/p/node_modules/dep/index.js",
    )));
    session.pump(&mut log.sink());
    assert_eq!(log.updated, 2);
    Ok(())
}

#[test]
fn unwatched_paths_are_ignored() -> Result<()> {
    let sys = greeter_project();
    let mut session = WatchSession::new(&sys, options());
    let mut log = Log::default();
    session.start(&mut log.sink());

    sys.push_event(FsEvent::Changed(PathBuf::from("/somewhere/else.ts")));
    session.pump(&mut log.sink());

    assert_eq!(log.started, 1, "unrelated events must not trigger a pass");
    Ok(())
}

#[test]
fn cancellation_releases_watches() -> Result<()> {
    let sys = greeter_project();
    let mut session = WatchSession::new(&sys, options());
    let mut log = Log::default();
    session.start(&mut log.sink());
    assert!(!sys.watched().is_empty());

    session.cancel(&mut log.sink());
    assert_eq!(session.state(), WatchState::Cancelled);
    assert!(sys.watched().is_empty());

    sys.push_event(FsEvent::Changed(PathBuf::from("/p/agent/greet.ts")));
    session.pump(&mut log.sink());
    assert_eq!(log.started, 1, "cancelled sessions ignore further events");
    Ok(())
}
