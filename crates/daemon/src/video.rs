//! Catalog data model and payload-to-catalog synthesis.
//!
//! Mirrors the original's `video_source.go` / `video_info.go` / `hash.go`:
//! two payload shapes (`VideoSource`, `VideoInfo`) each know how to
//! synthesize a catalog-ready [`Video`] row via [`ToVideo`].

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Output format tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VideoFormat {
    #[serde(rename = "2D")]
    TwoD,
    #[serde(rename = "3D")]
    ThreeD,
    Vr,
}

impl Default for VideoFormat {
    fn default() -> Self {
        VideoFormat::TwoD
    }
}

impl std::fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoFormat::TwoD => write!(f, "2D"),
            VideoFormat::ThreeD => write!(f, "3D"),
            VideoFormat::Vr => write!(f, "VR"),
        }
    }
}

/// The catalog row assembled during execution of a Job's run pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Video {
    /// Assigned at insert; empty until the catalog adapter writes it.
    pub id: String,
    /// Stable external identifier (`Bangumi` uppercased for `source`, `id` verbatim for `info`).
    pub business_key: String,
    pub intro: String,
    pub alias: Vec<String>,
    pub role: Vec<String>,
    pub director: String,
    pub tags: Vec<String>,
    pub series: String,
    pub date: String,
    pub length: String,
    pub producer: String,
    pub publisher: String,
    pub language: String,
    pub caption: String,
    pub format: VideoFormat,
    pub sharpness: String,
    pub systematics: String,
    pub season: String,
    pub episode: String,
    pub total_episode: String,
    pub kind: String,
    pub uncensored: bool,
    pub source_hash: String,
    pub m3u8_hash: String,
    pub poster_hash: String,
    pub thumb_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
    pub version: i64,
}

/// Artifact kind recorded by a [`Hash`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashType {
    Video,
    Slice,
    Poster,
    Thumb,
    Caption,
    Other,
}

/// Secondary catalog row recording one content-addressed artifact, grounded
/// on the original's `hash.go`. Kept so the catalog's schema-sync operation
/// has more than one table to demonstrate syncing over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hash {
    pub id: String,
    pub checksum: String,
    pub hash_type: HashType,
    pub episode: String,
    pub name: String,
    pub hash: String,
    pub sharpness: String,
    pub caption: String,
    pub encrypt: bool,
    pub key: String,
    pub m3u8: String,
    pub segment_file: String,
    pub resource: String,
}

/// A single named actor/cast member, from `info` payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    #[serde(default)]
    pub alias: Vec<String>,
}

/// A single genre/tag, from `info` payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genre {
    pub content: String,
}

/// A sample still image reference, from `info` payloads. Carried through
/// unused by catalog synthesis, matching the original's `Sample` struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub index: i64,
    pub thumb: String,
    pub image: String,
    pub title: String,
}

/// The `source` payload: a video with its asset paths, decoded from a
/// Job's opaque `payload` bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoSource {
    pub bangumi: String,
    #[serde(default)]
    pub format: String,
    pub intro: String,
    #[serde(default)]
    pub alias: Vec<String>,
    #[serde(default)]
    pub role: Vec<String>,
    #[serde(default)]
    pub director: String,
    #[serde(default)]
    pub systematics: String,
    #[serde(default)]
    pub season: String,
    #[serde(default)]
    pub episode: String,
    #[serde(default)]
    pub total_episode: String,
    #[serde(default)]
    pub producer: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub sharpness: String,
    #[serde(default)]
    pub series: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub length: String,
    #[serde(default)]
    pub uncensored: bool,
}

/// The `info` payload: pre-parsed metadata, decoded from a Job's opaque
/// `payload` bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub original_title: String,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub studio: String,
    #[serde(default)]
    pub movie_set: String,
    #[serde(default)]
    pub plot: String,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub actors: Vec<Actor>,
    #[serde(default)]
    pub sample: Vec<Sample>,
    #[serde(default)]
    pub uncensored: bool,
}

/// Shared capability: synthesize a catalog-ready [`Video`] from a decoded
/// payload. Closed over `{Source, Info}`; not open polymorphism.
pub trait ToVideo {
    fn to_video(&self) -> Video;
}

/// Defaults a blank string to `fallback`, mirroring the original's `MustString`.
fn must_string(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn parse_format(value: &str) -> VideoFormat {
    match value {
        "3D" => VideoFormat::ThreeD,
        "VR" => VideoFormat::Vr,
        _ => VideoFormat::TwoD,
    }
}

impl ToVideo for VideoSource {
    fn to_video(&self) -> Video {
        let alias0 = self.alias.first().map(String::as_str).unwrap_or("");
        let role0 = self.role.first().map(String::as_str).unwrap_or("");
        let intro = if !self.intro.is_empty() {
            self.intro.clone()
        } else {
            format!("{} {}", alias0, role0).trim().to_string()
        };
        Video {
            business_key: self.bangumi.to_uppercase(),
            intro,
            alias: self.alias.clone(),
            role: self.role.clone(),
            director: self.director.clone(),
            tags: self.tags.clone(),
            series: self.series.clone(),
            date: self.date.clone(),
            length: self.length.clone(),
            producer: self.producer.clone(),
            publisher: self.publisher.clone(),
            language: self.language.clone(),
            caption: self.caption.clone(),
            format: parse_format(&must_string(&self.format, "2D")),
            sharpness: self.sharpness.clone(),
            systematics: self.systematics.clone(),
            season: must_string(&self.season, "1"),
            episode: must_string(&self.episode, "1"),
            total_episode: must_string(&self.total_episode, "1"),
            kind: "source".to_string(),
            uncensored: self.uncensored,
            ..Video::default()
        }
    }
}

impl ToVideo for VideoInfo {
    fn to_video(&self) -> Video {
        let role: Vec<String> = self.actors.iter().map(|a| a.name.clone()).collect();
        let tags: Vec<String> = self.genres.iter().map(|g| g.content.clone()).collect();
        Video {
            business_key: self.id.clone(),
            intro: self.title.clone(),
            role,
            tags,
            producer: self.studio.clone(),
            series: self.movie_set.clone(),
            date: self.release_date.clone(),
            format: parse_format(""),
            season: must_string("", "1"),
            episode: must_string("", "1"),
            total_episode: must_string("", "1"),
            kind: "info".to_string(),
            uncensored: self.uncensored,
            ..Video::default()
        }
    }
}

/// Derives the episode ordinal of a file within a multi-file ingest from the
/// `@X` filename suffix convention. `abc-123@A.mp4` -> 1, `abc-123@B.mp4` ->
/// 2, `abc-123.mp4` (no `@`) -> 1.
pub fn episode_index(path: &str) -> u32 {
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    match stem.rsplit_once('@') {
        Some((_, suffix)) => match suffix.as_bytes().first() {
            Some(&b) if b.is_ascii_uppercase() => (b - b'A' + 1) as u32,
            _ => 1,
        },
        None => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn episode_index_no_at_sign() {
        assert_eq!(episode_index("abc-123.mp4"), 1);
    }

    #[test]
    fn episode_index_letter_suffix() {
        assert_eq!(episode_index("abc-123@A.mp4"), 1);
        assert_eq!(episode_index("abc-123@B.mp4"), 2);
        assert_eq!(episode_index("abc-123@C.mp4"), 3);
    }

    #[test]
    fn episode_index_non_letter_suffix() {
        assert_eq!(episode_index("abc-123@9.mp4"), 1);
        assert_eq!(episode_index("abc-123@.mp4"), 1);
    }

    #[test]
    fn episode_index_lowercase_suffix_is_not_a_letter_match() {
        // `strings.IndexByte(relateList, suffix[0])` in the original only
        // searches the uppercase alphabet; a lowercase byte is never found
        // and falls through to the "otherwise" branch.
        assert_eq!(episode_index("x@b"), 1);
    }

    #[test]
    fn episode_index_round_trip_for_all_26_letters() {
        for n in 1..=26u32 {
            let letter = (b'A' + (n - 1) as u8) as char;
            let name = format!("x@{letter}");
            assert_eq!(episode_index(&name), n);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]
        #[test]
        fn prop_episode_index_only_uppercase_ascii_is_nontrivial(suffix in 0u8..128) {
            let name = format!("x@{}", suffix as char);
            let expected = if suffix.is_ascii_uppercase() {
                (suffix - b'A' + 1) as u32
            } else {
                1
            };
            prop_assert_eq!(episode_index(&name), expected);
        }

        #[test]
        fn prop_episode_index_no_at_sign_is_always_one(stem in "[a-zA-Z0-9_-]{0,16}") {
            prop_assert_eq!(episode_index(&format!("{stem}.mp4")), 1);
        }
    }

    #[test]
    fn source_business_key_uppercased() {
        let src = VideoSource {
            bangumi: "abc-001".to_string(),
            ..Default::default()
        };
        assert_eq!(src.to_video().business_key, "ABC-001");
    }

    #[test]
    fn info_business_key_verbatim() {
        let info = VideoInfo {
            id: "abc-001".to_string(),
            ..Default::default()
        };
        assert_eq!(info.to_video().business_key, "abc-001");
    }

    #[test]
    fn source_intro_falls_back_to_alias_and_role() {
        let src = VideoSource {
            bangumi: "abc".to_string(),
            intro: "".to_string(),
            alias: vec!["Alias1".to_string()],
            role: vec!["Role1".to_string()],
            ..Default::default()
        };
        assert_eq!(src.to_video().intro, "Alias1 Role1");
    }

    #[test]
    fn source_defaults_season_episode_total_episode_format() {
        let src = VideoSource {
            bangumi: "abc".to_string(),
            ..Default::default()
        };
        let video = src.to_video();
        assert_eq!(video.season, "1");
        assert_eq!(video.episode, "1");
        assert_eq!(video.total_episode, "1");
        assert_eq!(video.format, VideoFormat::TwoD);
    }

    #[test]
    fn info_projects_actor_names_and_genre_content() {
        let info = VideoInfo {
            id: "abc".to_string(),
            actors: vec![Actor {
                name: "Performer".to_string(),
                alias: vec![],
            }],
            genres: vec![Genre {
                content: "Drama".to_string(),
            }],
            ..Default::default()
        };
        let video = info.to_video();
        assert_eq!(video.role, vec!["Performer".to_string()]);
        assert_eq!(video.tags, vec!["Drama".to_string()]);
    }
}
