//! Session-level tests touching the on-disk layout directly

#[cfg(test)]
mod tests {
    use crate::SessionConfig;
    use crate::SessionHandle;
    use crate::SessionRegistry;
    use crate::SessionValue;
    use crate::Settings;
    use crate::layout::HISTORY_FILE;
    use crate::layout::VERSION_FILE;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn open(registry: &mut SessionRegistry, dir: &TempDir, name: &str) -> SessionHandle {
        registry
            .open(SessionConfig::named(name).with_basedir(dir.path()))
            .unwrap()
    }

    #[test]
    fn test_record_writes_snapshot_layout() {
        let dir = TempDir::new().unwrap();
        let mut registry = SessionRegistry::default();
        let handle = open(&mut registry, &dir, "demo");
        let mut session = handle.lock();

        session.set("x", json!(10)).unwrap();
        session.record("init").unwrap();

        let id = session.history()[0].id.clone();
        let folder = session.layout().record_dir(&id);
        assert!(folder.join("data/x.json").is_file());
        for file in ["_scene.json", "_settings.json", "_tolerance.json", VERSION_FILE] {
            assert!(folder.join(file).is_file(), "{file}");
        }

        let version: String =
            crate::codec::read_json(&session.layout().version_file()).unwrap();
        assert_eq!(version, crate::VERSION);

        let history: serde_json::Value =
            crate::codec::read_json(&dir.path().join("demo.session").join(HISTORY_FILE)).unwrap();
        assert_eq!(history["current"], json!(0));
        assert_eq!(history["records"][0][1], json!("init"));
    }

    #[test]
    fn test_undo_with_missing_snapshot_leaves_state_unchanged() {
        let dir = TempDir::new().unwrap();
        let mut registry = SessionRegistry::default();
        let handle = open(&mut registry, &dir, "broken");
        let mut session = handle.lock();

        session.set("x", json!(1)).unwrap();
        session.record("one").unwrap();
        session.set("x", json!(2)).unwrap();
        session.record("two").unwrap();

        let first = session.history()[0].id.clone();
        fs::remove_dir_all(session.layout().record_dir(&first)).unwrap();

        assert!(!session.undo().unwrap());
        assert_eq!(session.current(), 1);
        assert_eq!(session.get("x").unwrap(), Some(&SessionValue::from(json!(2))));
        let on_disk = fs::read_to_string(session.layout().data_dir().join("x.json")).unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&on_disk).unwrap(), json!(2));
    }

    #[test]
    fn test_undo_restores_scene_and_settings() {
        let dir = TempDir::new().unwrap();
        let mut registry = SessionRegistry::default();
        let handle = open(&mut registry, &dir, "scene");
        let mut session = handle.lock();

        session.scene_mut().as_value_mut()["objects"] = json!(["a"]);
        session.record("a").unwrap();

        session.scene_mut().as_value_mut()["objects"] = json!(["a", "b"]);
        session.settings_mut().autosave = true;
        session.record("b").unwrap();

        assert!(session.undo().unwrap());
        assert_eq!(session.scene().as_value()["objects"], json!(["a"]));
        assert!(!session.settings().autosave);

        assert!(session.redo().unwrap());
        assert_eq!(session.scene().as_value()["objects"], json!(["a", "b"]));
        assert!(session.settings().autosave);
    }

    #[test]
    fn test_reopen_resumes_history_and_data() {
        let dir = TempDir::new().unwrap();
        {
            let mut registry = SessionRegistry::default();
            let handle = open(&mut registry, &dir, "resume");
            let mut session = handle.lock();
            session.set("x", json!("kept")).unwrap();
            session.record("first").unwrap();
            session.record("second").unwrap();
        }

        let mut registry = SessionRegistry::default();
        let handle = open(&mut registry, &dir, "resume");
        let mut session = handle.lock();
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.current(), 1);
        assert_eq!(
            session.get("x").unwrap(),
            Some(&SessionValue::from(json!("kept")))
        );
        assert!(session.undo().unwrap());
    }

    #[test]
    fn test_reopen_with_smaller_depth_keeps_snapshots_consistent() {
        let dir = TempDir::new().unwrap();
        {
            let mut registry = SessionRegistry::default();
            let handle = open(&mut registry, &dir, "shrink");
            let mut session = handle.lock();
            for n in 0..5 {
                session.set("n", json!(n)).unwrap();
                session.record(&format!("r{n}")).unwrap();
            }
        }
        {
            let mut registry = SessionRegistry::default();
            let handle = registry
                .open(
                    SessionConfig::named("shrink")
                        .with_basedir(dir.path())
                        .with_depth(2),
                )
                .unwrap();
            assert_eq!(handle.lock().history().len(), 2);
        }

        let mut registry = SessionRegistry::default();
        let handle = open(&mut registry, &dir, "shrink");
        let mut session = handle.lock();

        let labels: Vec<&str> = session.history().iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["r3", "r4"]);
        assert_eq!(session.depth(), 2);
        let missing: Vec<String> = session
            .history()
            .iter()
            .filter(|r| !session.layout().record_dir(&r.id).is_dir())
            .map(|r| r.label.clone())
            .collect();
        assert_eq!(missing, Vec::<String>::new());

        assert!(session.undo().unwrap());
        assert_eq!(session.get("n").unwrap(), Some(&SessionValue::from(json!(3))));
        assert!(!session.undo().unwrap());
    }

    #[test]
    fn test_delete_existing_starts_clean() {
        let dir = TempDir::new().unwrap();
        {
            let mut registry = SessionRegistry::default();
            let handle = open(&mut registry, &dir, "wipe");
            let mut session = handle.lock();
            session.set("x", json!(1)).unwrap();
            session.record("first").unwrap();
        }

        let mut registry = SessionRegistry::default();
        let handle = registry
            .open(
                SessionConfig::named("wipe")
                    .with_basedir(dir.path())
                    .delete_existing(true),
            )
            .unwrap();
        let mut session = handle.lock();
        assert!(session.history().is_empty());
        assert_eq!(session.current(), -1);
        assert_eq!(session.get("x").unwrap(), None);
    }

    #[test]
    fn test_open_prunes_orphan_snapshots_and_staging() {
        let dir = TempDir::new().unwrap();
        let session_dir = dir.path().join("tidy.session");
        fs::create_dir_all(session_dir.join("__records/stale")).unwrap();
        fs::create_dir_all(session_dir.join("__temp/restore-x")).unwrap();

        let mut registry = SessionRegistry::default();
        let _handle = open(&mut registry, &dir, "tidy");

        assert!(!session_dir.join("__records/stale").exists());
        assert_eq!(fs::read_dir(session_dir.join("__temp")).unwrap().count(), 0);
    }

    #[test]
    fn test_load_drops_unsaved_changes() {
        let dir = TempDir::new().unwrap();
        let mut registry = SessionRegistry::default();
        let handle = registry
            .open(
                SessionConfig::named("reload")
                    .with_basedir(dir.path())
                    .with_settings(Settings {
                        autosave: false,
                        autosync: false,
                    }),
            )
            .unwrap();
        let mut session = handle.lock();

        session.set("x", json!(1)).unwrap();
        session.dump().unwrap();
        session.set("x", json!(2)).unwrap();

        session.load().unwrap();
        assert_eq!(session.get("x").unwrap(), Some(&SessionValue::from(json!(1))));
    }

    #[test]
    fn test_display_lists_resident_keys() {
        let dir = TempDir::new().unwrap();
        let mut registry = SessionRegistry::default();
        let handle = open(&mut registry, &dir, "shown");
        let mut session = handle.lock();
        session.set("b", json!(1)).unwrap();
        session.set("a", json!(2)).unwrap();

        let text = session.to_string();
        assert!(text.starts_with("Data: [\"a\", \"b\"]"));
        assert!(text.contains("History: []"));
    }
}
