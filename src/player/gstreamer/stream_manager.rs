use crate::player::types::{TrackDescriptor, TrackKind};
use crate::utils::{PlaybinError, Result};
use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use tracing::{debug, trace};

/// Property names and `flags` nicks `playbin` uses for one kind of track.
struct TrackProps {
    count: &'static str,
    current: &'static str,
    tags_signal: &'static str,
    flag: &'static str,
}

fn props(kind: TrackKind) -> TrackProps {
    match kind {
        TrackKind::Audio => TrackProps {
            count: "n-audio",
            current: "current-audio",
            tags_signal: "get-audio-tags",
            flag: "audio",
        },
        TrackKind::Subtitle => TrackProps {
            count: "n-text",
            current: "current-text",
            tags_signal: "get-text-tags",
            flag: "text",
        },
    }
}

/// Audio and subtitle stream handling for a `playbin` element.
pub struct StreamManager {
    playbin: gst::Element,
}

impl StreamManager {
    pub fn new(playbin: gst::Element) -> Self {
        Self { playbin }
    }

    pub fn track_count(&self, kind: TrackKind) -> usize {
        let count = self.playbin.property::<i32>(props(kind).count);
        usize::try_from(count).unwrap_or(0)
    }

    /// Reads the stream tags for one track.
    ///
    /// Untagged streams still produce a descriptor, with no language or codec.
    pub fn track(&self, kind: TrackKind, index: usize) -> TrackDescriptor {
        let props = props(kind);
        let tags = i32::try_from(index).ok().and_then(|idx| {
            self.playbin
                .emit_by_name::<Option<gst::TagList>>(props.tags_signal, &[&idx])
        });

        let language = tags.as_ref().and_then(|t| {
            t.index::<gst::tags::LanguageCode>(0)
                .map(|lang| lang.get().to_string())
        });
        let codec = tags.as_ref().and_then(|t| match kind {
            TrackKind::Audio => t
                .index::<gst::tags::AudioCodec>(0)
                .map(|codec| codec.get().to_string()),
            TrackKind::Subtitle => t
                .index::<gst::tags::SubtitleCodec>(0)
                .map(|codec| codec.get().to_string()),
        });

        trace!(
            "{} track {}: language={:?} codec={:?}",
            kind, index, language, codec
        );

        TrackDescriptor {
            index,
            kind,
            language,
            codec,
        }
    }

    /// The selected track, or `None` while rendering of `kind` is disabled.
    pub fn current_track(&self, kind: TrackKind) -> Option<usize> {
        let props = props(kind);
        if !self.flag_is_set(props.flag) {
            return None;
        }
        usize::try_from(self.playbin.property::<i32>(props.current)).ok()
    }

    pub fn select_track(&self, kind: TrackKind, index: Option<usize>) -> Result<()> {
        let props = props(kind);
        match index {
            Some(index) => {
                let index = i32::try_from(index).map_err(|_| PlaybinError::InvalidIndex {
                    kind,
                    index,
                    count: self.track_count(kind),
                })?;
                self.update_flags(&[props.flag], &[])?;
                self.playbin.set_property(props.current, index);
                debug!("Set {} to {}", props.current, index);
            }
            None => {
                self.update_flags(&[], &[props.flag])?;
                debug!("Disabled {} flag", props.flag);
            }
        }
        Ok(())
    }

    /// Turns audio and subtitle rendering on, as a freshly loaded source expects.
    pub fn enable_all(&self) -> Result<()> {
        self.update_flags(&["audio", "text"], &[])
    }

    fn flag_is_set(&self, nick: &str) -> bool {
        let flags = self.playbin.property_value("flags");
        glib::FlagsClass::with_type(flags.type_())
            .is_some_and(|class| class.is_set_by_nick(&flags, nick))
    }

    fn update_flags(&self, set: &[&str], unset: &[&str]) -> Result<()> {
        let flags = self.playbin.property_value("flags");
        let class = glib::FlagsClass::with_type(flags.type_())
            .ok_or_else(|| PlaybinError::engine("flags", "playbin flags are not a flags type"))?;

        let mut builder = class
            .builder_with_value(flags)
            .ok_or_else(|| PlaybinError::engine("flags", "cannot read playbin flags"))?;
        for nick in set {
            builder = builder.set_by_nick(nick);
        }
        for nick in unset {
            builder = builder.unset_by_nick(nick);
        }
        let flags = builder
            .build()
            .ok_or_else(|| PlaybinError::engine("flags", "invalid playbin flags"))?;

        self.playbin.set_property_from_value("flags", &flags);
        Ok(())
    }
}
