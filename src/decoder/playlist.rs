//! HLS playlists resolved for following
//!
//! Parsing is done by `m3u8_rs`; this module resolves every URI against the
//! playlist URL, numbers segments, and carries `#EXT-X-MAP` and
//! `#EXT-X-BYTERANGE` forward to the segments they apply to.

use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq)]
pub enum PlaylistError {
    #[error("not a valid M3U8 playlist")]
    Malformed,

    #[error("unresolvable uri `{uri}`: {source}")]
    BadUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("master playlist lists no variant")]
    NoVariant,
}

/// One rendition listed in a master playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub bandwidth: u64,
    pub uri: Url,
}

/// Slice of a resource, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    pub offset: u64,
    pub length: u64,
}

impl ByteSpan {
    /// Value of the HTTP `Range` header selecting this span.
    pub fn range_header(&self) -> String {
        let last = self.offset + self.length.saturating_sub(1);
        format!("bytes={}-{}", self.offset, last)
    }
}

/// Initialization section (`#EXT-X-MAP`) the demuxer needs before a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct InitSection {
    pub uri: Url,
    pub range: Option<ByteSpan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Media sequence number.
    pub sequence: u64,
    /// Duration in seconds, from `#EXTINF`.
    pub duration: f64,
    pub uri: Url,
    /// Set when only part of `uri` belongs to this segment.
    pub range: Option<ByteSpan>,
    /// Map in effect for this segment, inherited from earlier ones.
    pub init: Option<InitSection>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaPlaylist {
    pub target_duration: f64,
    pub media_sequence: u64,
    pub segments: Vec<Segment>,
    /// `#EXT-X-ENDLIST` seen: no segment will ever be appended.
    pub ended: bool,
}

impl MediaPlaylist {
    /// Sequence number following the last listed segment.
    pub fn next_sequence(&self) -> u64 {
        self.media_sequence + self.segments.len() as u64
    }

    /// Where playback starts: `offset` segments back from the live edge, or
    /// the very first segment of a finished playlist.
    pub fn start_sequence(&self, offset: usize) -> u64 {
        if self.ended {
            return self.media_sequence;
        }
        let back = offset.min(self.segments.len()) as u64;
        self.next_sequence() - back
    }

    /// Segments with a sequence number of at least `sequence`.
    pub fn segments_from(&self, sequence: u64) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(move |s| s.sequence >= sequence)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Playlist {
    Master(Vec<Variant>),
    Media(MediaPlaylist),
}

impl Playlist {
    /// Highest-bandwidth variant of a master playlist.
    pub fn best_variant(&self) -> Option<&Variant> {
        match self {
            Playlist::Master(variants) => variants.iter().max_by_key(|v| v.bandwidth),
            Playlist::Media(_) => None,
        }
    }
}

/// Parse `bytes`, resolving relative URIs against `base` (the playlist URL).
pub fn parse(base: &Url, bytes: &[u8]) -> Result<Playlist, PlaylistError> {
    match m3u8_rs::parse_playlist_res(bytes) {
        Ok(m3u8_rs::Playlist::MasterPlaylist(master)) => master_variants(base, master).map(Playlist::Master),
        Ok(m3u8_rs::Playlist::MediaPlaylist(media)) => resolve_media(base, media).map(Playlist::Media),
        Err(_) => Err(PlaylistError::Malformed),
    }
}

fn master_variants(base: &Url, master: m3u8_rs::MasterPlaylist) -> Result<Vec<Variant>, PlaylistError> {
    let variants = master
        .variants
        .into_iter()
        // I-frame-only renditions are trick-play indexes
        .filter(|v| !v.is_i_frame)
        .map(|v| -> Result<Variant, PlaylistError> {
            Ok(Variant {
                bandwidth: v.bandwidth,
                uri: join(base, &v.uri)?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if variants.is_empty() {
        return Err(PlaylistError::NoVariant);
    }
    Ok(variants)
}

fn resolve_media(base: &Url, media: m3u8_rs::MediaPlaylist) -> Result<MediaPlaylist, PlaylistError> {
    let mut segments = Vec::with_capacity(media.segments.len());
    let mut init: Option<InitSection> = None;
    // end of the previous byte range, for ranges that omit their offset
    let mut range_end: Option<(Url, u64)> = None;

    for (index, segment) in media.segments.into_iter().enumerate() {
        if let Some(map) = &segment.map {
            init = Some(InitSection {
                uri: join(base, &map.uri)?,
                range: map.byte_range.as_ref().map(|r| ByteSpan {
                    offset: r.offset.unwrap_or(0),
                    length: r.length,
                }),
            });
        }

        let uri = join(base, &segment.uri)?;
        let range = segment.byte_range.as_ref().map(|r| {
            let offset = r.offset.unwrap_or_else(|| match &range_end {
                Some((previous, end)) if *previous == uri => *end,
                _ => 0,
            });
            ByteSpan {
                offset,
                length: r.length,
            }
        });
        range_end = range.map(|span| (uri.clone(), span.offset + span.length));

        segments.push(Segment {
            sequence: media.media_sequence + index as u64,
            duration: segment.duration as f64,
            uri,
            range,
            init: init.clone(),
        });
    }

    Ok(MediaPlaylist {
        target_duration: media.target_duration as f64,
        media_sequence: media.media_sequence,
        segments,
        ended: media.end_list,
    })
}

fn join(base: &Url, uri: &str) -> Result<Url, PlaylistError> {
    base.join(uri).map_err(|source| PlaylistError::BadUri {
        uri: uri.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/live/channel/index.m3u8").unwrap()
    }

    fn media(text: &str) -> MediaPlaylist {
        match parse(&base(), text.as_bytes()).unwrap() {
            Playlist::Media(media) => media,
            Playlist::Master(_) => panic!("expected media playlist"),
        }
    }

    #[test]
    fn test_master_playlist_variants() {
        let text = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,CODECS=\"avc1.4d401e,mp4a.40.2\"\n\
            low/index.m3u8\n\
            #EXT-X-STREAM-INF:CODECS=\"avc1.640028,mp4a.40.2\",BANDWIDTH=5000000,RESOLUTION=1920x1080\n\
            https://other.example.com/high.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=2000000\n\
            /abs/mid.m3u8\n";

        let playlist = parse(&base(), text.as_bytes()).unwrap();
        let Playlist::Master(variants) = &playlist else {
            panic!("expected master playlist");
        };
        assert_eq!(variants.len(), 3);
        assert_eq!(
            variants[0].uri.as_str(),
            "https://cdn.example.com/live/channel/low/index.m3u8"
        );
        assert_eq!(variants[2].uri.as_str(), "https://cdn.example.com/abs/mid.m3u8");

        let best = playlist.best_variant().unwrap();
        assert_eq!(best.bandwidth, 5_000_000);
        assert_eq!(best.uri.as_str(), "https://other.example.com/high.m3u8");
    }

    #[test]
    fn test_live_media_playlist() {
        let media = media(
            "#EXTM3U\n\
            #EXT-X-VERSION:3\n\
            #EXT-X-TARGETDURATION:6\n\
            #EXT-X-MEDIA-SEQUENCE:120\n\
            #EXTINF:6.006,\n\
            seg120.ts\n\
            #EXTINF:5.994,title\n\
            seg121.ts\n\
            #EXTINF:6.0,\n\
            seg122.ts\n\
            #EXTINF:6.0,\n\
            seg123.ts\n",
        );

        assert_eq!(media.target_duration, 6.0);
        assert_eq!(media.media_sequence, 120);
        assert!(!media.ended);
        assert_eq!(media.segments.len(), 4);
        assert_eq!(media.segments[1].sequence, 121);
        assert!((media.segments[1].duration - 5.994).abs() < 1e-4);
        assert_eq!(
            media.segments[3].uri.as_str(),
            "https://cdn.example.com/live/channel/seg123.ts"
        );
        assert!(media.segments.iter().all(|s| s.range.is_none() && s.init.is_none()));

        assert_eq!(media.next_sequence(), 124);
        // three segments back from the live edge
        assert_eq!(media.start_sequence(3), 121);
        assert_eq!(media.start_sequence(10), 120);
        assert_eq!(media.segments_from(122).count(), 2);
    }

    #[test]
    fn test_vod_playlist_starts_at_beginning() {
        let media = media("#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4,\na.ts\n#EXTINF:4,\nb.ts\n#EXT-X-ENDLIST\n");

        assert!(media.ended);
        assert_eq!(media.media_sequence, 0);
        assert_eq!(media.start_sequence(3), 0);
    }

    #[test]
    fn test_map_applies_until_replaced() {
        let media = media(
            "#EXTM3U\n#EXT-X-TARGETDURATION:2\n\
            #EXT-X-MAP:URI=\"init-a.mp4\"\n\
            #EXTINF:2,\na0.m4s\n\
            #EXTINF:2,\na1.m4s\n\
            #EXT-X-MAP:URI=\"init-b.mp4\",BYTERANGE=\"100@20\"\n\
            #EXTINF:2,\nb0.m4s\n\
            #EXT-X-ENDLIST\n",
        );

        let first = media.segments[0].init.as_ref().unwrap();
        assert_eq!(first.uri.as_str(), "https://cdn.example.com/live/channel/init-a.mp4");
        assert_eq!(first.range, None);
        assert_eq!(media.segments[1].init, media.segments[0].init);

        let second = media.segments[2].init.as_ref().unwrap();
        assert_eq!(second.uri.as_str(), "https://cdn.example.com/live/channel/init-b.mp4");
        assert_eq!(second.range, Some(ByteSpan { offset: 20, length: 100 }));
    }

    #[test]
    fn test_byte_range_offsets_continue_within_resource() {
        let media = media(
            "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXT-X-VERSION:4\n\
            #EXTINF:1,\n#EXT-X-BYTERANGE:500@1000\nmain.ts\n\
            #EXTINF:1,\n#EXT-X-BYTERANGE:300\nmain.ts\n\
            #EXTINF:1,\n#EXT-X-BYTERANGE:200\nother.ts\n\
            #EXT-X-ENDLIST\n",
        );

        let ranges: Vec<_> = media.segments.iter().map(|s| s.range).collect();
        assert_eq!(
            ranges,
            vec![
                Some(ByteSpan { offset: 1000, length: 500 }),
                Some(ByteSpan { offset: 1500, length: 300 }),
                Some(ByteSpan { offset: 0, length: 200 }),
            ]
        );
        assert_eq!(ranges[1].unwrap().range_header(), "bytes=1500-1799");
    }

    #[test]
    fn test_rejects_non_playlists() {
        assert_eq!(parse(&base(), b"#EXTINF:4,\na.ts\n"), Err(PlaylistError::Malformed));
        assert_eq!(parse(&base(), b""), Err(PlaylistError::Malformed));
        assert_eq!(parse(&base(), b"not a playlist"), Err(PlaylistError::Malformed));
    }

    #[test]
    fn test_iframe_only_master_has_no_variant() {
        let text = "#EXTM3U\n#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=90000,URI=\"iframes.m3u8\"\n";
        assert_eq!(parse(&base(), text.as_bytes()), Err(PlaylistError::NoVariant));
    }
}
