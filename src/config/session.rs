// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::fs;
use std::path::Path;

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::LoadError;
use super::track::Track;
use crate::clock::DEFAULT_MAX_SUPER_TICKS;
use crate::midi_export::ExportOptions;
use crate::session::{self, SequencerSession, DEFAULT_BPM, DEFAULT_NAME};
use crate::voice::DEFAULT_VOICES_PER_SAMPLE;

/// A YAML representation of a sequencer session.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Session {
    /// The project name, used for exported file names.
    name: String,
    bpm: f64,
    /// Ceiling on the number of super-ticks per bar.
    max_super_ticks: u64,
    /// Voices allocated to each distinct sample.
    voices_per_sample: usize,
    tracks: Vec<Track>,
    export: ExportOptions,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            name: DEFAULT_NAME.to_string(),
            bpm: DEFAULT_BPM,
            max_super_ticks: DEFAULT_MAX_SUPER_TICKS,
            voices_per_sample: DEFAULT_VOICES_PER_SAMPLE,
            tracks: session::default_tracks().iter().map(Track::from).collect(),
            export: ExportOptions::default(),
        }
    }
}

impl Session {
    /// Deserializes a file from the path into a session configuration.
    pub fn deserialize(path: &Path) -> Result<Session, LoadError> {
        Ok(Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml))
            .build()?
            .try_deserialize::<Session>()?)
    }

    /// Parses a session configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Session, LoadError> {
        Ok(Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<Session>()?)
    }

    /// Captures the current state of a running session, keeping the given limits.
    pub fn from_session(
        session: &SequencerSession,
        voices_per_sample: usize,
        export: ExportOptions,
    ) -> Session {
        Session {
            name: session.name().to_string(),
            bpm: session.bpm(),
            max_super_ticks: session.max_super_ticks(),
            voices_per_sample,
            tracks: session.tracks().iter().map(Track::from).collect(),
            export,
        }
    }

    /// Serializes and saves the session configuration to the given path.
    pub fn save(&self, path: &Path) -> Result<(), LoadError> {
        let serialized = serde_yml::to_string(self)?;
        fs::write(path, serialized)?;
        info!(path = %path.display(), tracks = self.tracks.len(), "Saved session");
        Ok(())
    }

    /// Builds a sequencer session. Relative sample paths are resolved against `base`.
    pub fn to_session(&self, base: &Path) -> Result<SequencerSession, LoadError> {
        let tracks = self
            .tracks
            .iter()
            .enumerate()
            .map(|(index, track)| track.to_track(index, base))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SequencerSession::new(
            &self.name,
            tracks,
            self.bpm,
            self.max_super_ticks,
        )?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn voices_per_sample(&self) -> usize {
        self.voices_per_sample
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Gets the export settings.
    pub fn export(&self) -> &ExportOptions {
        &self.export
    }
}

#[cfg(test)]
mod tests {
    use midly::{MetaMessage, MidiMessage, Smf, TrackEventKind};

    use super::*;
    use crate::error::SequencerError;
    use crate::pattern;
    use crate::sampler::Sampler;
    use crate::samples::{SampleLibrary, SampleRef};
    use crate::track::TrackId;

    #[test]
    fn test_empty_file_is_the_default_session() {
        let config = Session::from_yaml("{}").unwrap();
        assert_eq!(config, Session::default());

        let session = config.to_session(Path::new(".")).unwrap();
        assert_eq!(session.name(), DEFAULT_NAME);
        assert_eq!(session.bpm(), 120.0);
        assert_eq!(session.tracks().len(), 4);
        assert_eq!(session.grid(), 240);
    }

    #[test]
    fn test_session_file() {
        let config = Session::from_yaml(
            r#"
            name: groove
            bpm: 96
            voices_per_sample: 2
            tracks:
              - steps: 16
                pulses: 4
                sample: kick
                midi_note: 36
              - name: Rim
                steps: 7
                pulses: 3
                offset: 2
                sample: snare
            export:
              bars: 2
              velocity: true
            "#,
        )
        .unwrap();
        assert_eq!(config.voices_per_sample(), 2);
        assert_eq!(config.export().bars, 2);
        assert!(config.export().velocity);
        assert!(!config.export().merge);

        let session = config.to_session(Path::new(".")).unwrap();
        assert_eq!(session.name(), "groove");
        assert_eq!(session.bpm(), 96.0);
        assert_eq!(session.grid(), 112);
        let rim = session.track(TrackId(1)).unwrap();
        assert_eq!(rim.name(), "Rim");
        assert_eq!(
            pattern::format(rim.pattern()),
            pattern::format(&pattern::rotate(&pattern::generate(7, 3), 2))
        );
    }

    #[test]
    fn test_invalid_sessions() {
        let config = Session::from_yaml("bpm: 0").unwrap();
        assert!(matches!(
            config.to_session(Path::new(".")),
            Err(LoadError::Invalid(SequencerError::InvalidBpm(_)))
        ));

        let config = Session::from_yaml(
            r#"
            max_super_ticks: 40
            tracks:
              - steps: 16
                sample: kick
              - steps: 12
                sample: snare
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.to_session(Path::new(".")),
            Err(LoadError::Invalid(SequencerError::SuperGridTooLarge {
                lcm: 48,
                max: 40
            }))
        ));
    }

    #[test]
    fn test_save_and_deserialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.yaml");

        let mut session = SequencerSession::with_defaults("saved");
        session.toggle_step(TrackId(2), 1).unwrap();
        session.set_bpm(140.0).unwrap();
        let config = Session::from_session(&session, 4, ExportOptions::default());
        config.save(&path).unwrap();

        let loaded = Session::deserialize(&path).unwrap();
        assert_eq!(loaded, config);
        let restored = loaded.to_session(dir.path()).unwrap();
        assert_eq!(restored.tracks(), session.tracks());
        assert_eq!(restored.bpm(), 140.0);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Session::deserialize(Path::new("/nonexistent/session.yaml")),
            Err(LoadError::Load(_))
        ));
    }

    #[test]
    fn test_session_file_with_a_custom_sample() {
        let dir = tempfile::tempdir().unwrap();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(dir.path().join("clap.wav"), spec).unwrap();
        for _ in 0..800 {
            writer.write_sample(i16::MAX / 2).unwrap();
        }
        writer.finalize().unwrap();

        let path = dir.path().join("session.yaml");
        fs::write(
            &path,
            r#"
name: clapping
bpm: 100
tracks:
  - name: Clap
    steps: 6
    pulses: 2
    sample:
      file: clap.wav
    midi_note: 39
  - steps: 4
    pulses: 4
    sample: hihat
export:
  merge: true
"#,
        )
        .unwrap();

        let config = Session::deserialize(&path).unwrap();
        let session = config.to_session(dir.path()).unwrap();
        assert_eq!(session.grid(), 12);

        let clap = session.track(TrackId(0)).unwrap();
        assert_eq!(
            clap.sample(),
            &SampleRef::Custom {
                file: dir.path().join("clap.wav")
            }
        );

        let mut sampler = Sampler::new(SampleLibrary::with_builtins(8000), 2);
        sampler.load(clap.sample()).unwrap();
        assert!(sampler.is_ready(clap.sample()));
        assert!(sampler.preview(TrackId(0), clap, 0.0).is_some());
        assert!(sampler.process_frames(0.0, 100, 1).iter().any(|&s| s != 0.0));

        let export = session
            .export_midi(&session.track_ids(), config.export())
            .unwrap();
        assert_eq!(export.file_name, "clapping.mid");
        let written = export.write_to_dir(dir.path()).unwrap();
        let bytes = fs::read(written).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 1);

        let notes: Vec<u8> = smf.tracks[0]
            .iter()
            .filter_map(|event| match event.kind {
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOn { key, .. },
                    ..
                } => Some(key.as_int()),
                _ => None,
            })
            .collect();
        // 2 claps and 4 hats per bar over the default 4 bars.
        assert_eq!(notes.iter().filter(|&&key| key == 39).count(), 8);
        assert_eq!(notes.iter().filter(|&&key| key == 36).count(), 16);

        let total: u32 = smf.tracks[0].iter().map(|event| event.delta.as_int()).sum();
        assert_eq!(total, 4 * 512);
        assert!(smf.tracks[0].iter().any(|event| matches!(
            event.kind,
            TrackEventKind::Meta(MetaMessage::Tempo(_))
        )));
    }
}
