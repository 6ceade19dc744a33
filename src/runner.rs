//! Command runner - entry point for the `vuer` binary.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use log::{debug, info, trace, warn};
use serde_json::{Value, json};

use crate::cli::{Args, Command};
use crate::core::player::Playback;
use crate::core::storage::{PlaybackSettings, Storage};
use crate::core::store::Store;
use crate::entities::events::ServerEvent;
use crate::entities::scene::SceneStore;
use crate::paths::{self, PathConfig};
use crate::share::{self, SHARE_LIMIT, SceneQuery};

/// Run one subcommand. Output goes to stdout, diagnostics to the log.
pub fn run(args: Args) -> Result<()> {
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    trace!("Command-line args: {:?}", args);

    match args.command {
        Command::Pack {
            file,
            base_url,
            force,
        } => {
            let output = pack(&file, base_url.as_deref(), force)?;
            println!("{}", output);
        }
        Command::Unpack { input } => {
            let root = unpack(&input)?;
            println!("{}", serde_json::to_string_pretty(&root)?);
        }
        Command::Replay {
            events,
            fps,
            maxlen,
            loop_playback,
        } => {
            if let Err(e) = paths::ensure_dirs(&path_config) {
                warn!("Failed to create application directories: {}", e);
            }
            let settings_path = paths::config_file(paths::SETTINGS_FILE, &path_config);
            info!("Settings path: {}", settings_path.display());
            let mut storage = Storage::load(&settings_path)?;

            let mut settings = PlaybackSettings::load(&mut storage)?;
            if let Some(fps) = fps {
                settings.fps = fps;
            }
            if let Some(maxlen) = maxlen {
                settings.maxlen = maxlen;
            }
            settings.loop_enabled |= loop_playback;

            let events = read_events(&events)?;
            let report = replay(events, &settings)?;
            println!("{}", serde_json::to_string_pretty(&report.summary())?);

            report.settings.save(&mut storage)?;
            storage.flush()?;
        }
    }
    Ok(())
}

// ========== pack / unpack ==========

/// Scene file to payload (or URL when `base_url` is given).
pub fn pack(file: &Path, base_url: Option<&str>, force: bool) -> Result<String> {
    let text = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let ext = file
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    let value: Value = match ext.as_str() {
        "yml" | "yaml" => serde_yaml::from_str(&text).context("Failed to parse YAML scene")?,
        _ => serde_json::from_str(&text).context("Failed to parse JSON scene")?,
    };
    let root = share::scene_from_value(value)?;

    let limit = if force { None } else { Some(SHARE_LIMIT) };
    let payload = share::pack_scene(&root, limit)?;
    info!("Packed {} into {} base64 chars", file.display(), payload.len());

    Ok(match base_url {
        Some(base) => share::share_url(base, &payload)?,
        None => payload,
    })
}

/// Payload, query string or full URL to a root node.
pub fn unpack(input: &str) -> Result<crate::entities::node::Node> {
    let input = input.trim();
    let is_query = input.contains('?') || input.starts_with("scene=") || input.contains("&scene=");
    let payload = if is_query {
        match SceneQuery::parse(input).scene {
            Some(scene) => scene,
            None => bail!("No scene parameter in {}", input),
        }
    } else {
        input.to_string()
    };
    Ok(share::unpack_scene(&payload)?)
}

// ========== replay ==========

/// Event log: a JSON array, or one event object per non-empty line.
pub fn read_events(path: &Path) -> Result<Vec<ServerEvent>> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if text.trim_start().starts_with('[') {
        return serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()));
    }
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("{}:{}: invalid event", path.display(), n + 1))
        })
        .collect()
}

/// Outcome of [`replay`].
#[derive(Debug)]
pub struct ReplayReport {
    pub published: usize,
    pub retained: usize,
    pub replayed: usize,
    pub live: SceneStore,
    pub replay: SceneStore,
    pub settings: PlaybackSettings,
}

impl ReplayReport {
    /// Whether the replayed scene ended up identical to the live one.
    pub fn converged(&self) -> bool {
        *self.live.snapshot() == *self.replay.snapshot()
    }

    pub fn summary(&self) -> Value {
        json!({
            "published": self.published,
            "retained": self.retained,
            "replayed": self.replayed,
            "converged": self.converged(),
            "live": &*self.live.snapshot(),
            "replay": &*self.replay.snapshot(),
        })
    }
}

/// Publish `events` on a downlink that feeds both a live scene and a
/// recording playback, then play the recording back into a second scene on a
/// simulated render clock.
pub fn replay(events: Vec<ServerEvent>, settings: &PlaybackSettings) -> Result<ReplayReport> {
    let downlink = Store::<ServerEvent>::new();
    let live = SceneStore::new();
    let _live_subs = live.bind(&downlink);

    let playback = Arc::new(Mutex::new(Playback::with_settings(settings)));
    {
        let mut p = playback.lock().unwrap_or_else(|e| e.into_inner());
        if !p.is_recording() {
            p.toggle_recording();
        }
    }
    let recorder = Playback::record_from(&playback, &downlink);

    let published = events.len();
    for event in events {
        downlink.publish(event);
    }
    downlink.scheduler().run_until_idle();
    recorder.call();

    let replay = SceneStore::new();
    let mut p = playback.lock().unwrap_or_else(|e| e.into_inner());
    let frames = p.store().clone();
    let _replay_subs = replay.bind(&frames);

    let retained = p.duration();
    info!("Recorded {} of {} event(s)", retained, published);
    if retained == 0 {
        p.toggle_recording();
        return Ok(ReplayReport {
            published,
            retained,
            replayed: 0,
            live,
            replay,
            settings: p.settings(),
        });
    }

    p.toggle_recording();
    p.reset();
    let mut replayed = 1;

    // One render tick per frame interval, one pass over the buffer. A
    // looping playback would otherwise wrap forever.
    if retained > 1 {
        p.toggle_playback();
        let interval = 1000.0 / p.fps();
        for _ in 1..retained {
            if !p.is_playing() {
                break;
            }
            if p.render(interval).is_some() {
                replayed += 1;
            }
            frames.scheduler().run_until_idle();
        }
    }
    if p.is_playing() {
        p.toggle_playback();
    }
    frames.scheduler().run_until_idle();
    debug!("Replayed {} frame(s) at {} fps", replayed, p.fps());

    Ok(ReplayReport {
        published,
        retained,
        replayed,
        live,
        replay,
        settings: p.settings(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MULTICAST;
    use crate::core::store_ops::combine;
    use crate::entities::events::{ClientEvent, add_op, remove_op, update_op};
    use crate::entities::node::{ChildrenKey, Node};

    fn events() -> Vec<ServerEvent> {
        vec![
            add_op(vec![Node::keyed("a", "Box")], None, Some(1.0)),
            add_op(vec![Node::keyed("b", "Sphere")], None, Some(2.0)),
            update_op(vec![Node::keyed("a", "Box").with_attr("color", "red")], Some(3.0)),
            remove_op(vec!["b".into()], Some(4.0)),
        ]
    }

    #[test]
    fn test_replay_converges() {
        let report = replay(events(), &PlaybackSettings::default()).unwrap();
        assert_eq!(report.published, 4);
        assert_eq!(report.retained, 4);
        assert_eq!(report.replayed, 4);
        assert!(report.converged());
        assert!(!report.settings.recording);
    }

    #[test]
    fn test_replay_truncated_buffer() {
        let settings = PlaybackSettings {
            maxlen: 2,
            ..Default::default()
        };
        let report = replay(events(), &settings).unwrap();
        assert_eq!(report.retained, 2);
        // The oldest ADDs fell out of the buffer, so the replay cannot match.
        assert!(!report.converged());
    }

    #[test]
    fn test_replay_empty() {
        let report = replay(Vec::new(), &PlaybackSettings::default()).unwrap();
        assert_eq!(report.replayed, 0);
        assert!(report.converged());
    }

    #[test]
    fn test_read_events_both_formats() {
        let dir = tempfile::tempdir().unwrap();
        let array = dir.path().join("events.json");
        fs::write(&array, r#"[{"ts": 1, "etype": "ADD", "data": {"nodes": []}}]"#).unwrap();
        assert_eq!(read_events(&array).unwrap().len(), 1);

        let lines = dir.path().join("events.jsonl");
        fs::write(
            &lines,
            "{\"ts\": 1, \"etype\": \"A\"}\n\n{\"ts\": 2, \"etype\": \"B\", \"data\": 5}\n",
        )
        .unwrap();
        let parsed = read_events(&lines).unwrap();
        assert_eq!(parsed[1].etype, "B");
        assert_eq!(parsed[0].data, Value::Null);
    }

    #[test]
    fn test_pack_then_unpack() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scene.yaml");
        fs::write(&file, "children:\n  - key: a\n    tag: Box\nup: [0, 0, 1]\n").unwrap();

        let url = pack(&file, Some("https://vuer.ai/"), false).unwrap();
        assert!(url.starts_with("https://vuer.ai/?scene="));
        let root = unpack(&url).unwrap();
        assert_eq!(root.tag, "Scene");
        assert_eq!(root.attr("up"), Some(&json!([0, 0, 1])));

        let payload = pack(&file, None, false).unwrap();
        assert_eq!(unpack(&payload).unwrap(), root);
    }

    #[test]
    fn test_uplink_events_are_recorded_with_downlink() {
        let downlink = Store::<ServerEvent>::new();
        let local = Store::<ServerEvent>::with_scheduler(downlink.scheduler());
        let uplink = Store::<ClientEvent>::with_scheduler(downlink.scheduler());

        uplink.add_reducer("CLICK", |mut e: ClientEvent| {
            e.value = Some(json!("clicked"));
            e
        });
        let echo = local.clone();
        uplink.subscribe(MULTICAST, move |e: &ClientEvent| {
            echo.publish(ServerEvent::from(e.clone()));
        });

        let merged = combine(&downlink, &local);
        let live = SceneStore::new();
        let _subs = live.bind(&merged);
        let playback = Arc::new(Mutex::new(Playback::new()));
        playback.lock().unwrap().toggle_recording();
        let _rec = Playback::record_from(&playback, &merged);

        downlink.publish(add_op(vec![Node::keyed("a", "Box")], None, Some(1.0)));
        uplink.publish(ClientEvent::new("CLICK", Some("a".into()), None));
        downlink.scheduler().run_until_idle();

        let p = playback.lock().unwrap();
        assert_eq!(p.duration(), 2);
        let types: Vec<&str> = p.key_frames().iter().map(|f| f.etype.as_str()).collect();
        assert_eq!(types, ["ADD", "CLICK"]);
        assert_eq!(p.last_frame().unwrap().data["value"], json!("clicked"));
        assert_eq!(live.snapshot().child_nodes(ChildrenKey::Children).count(), 1);
    }
}
