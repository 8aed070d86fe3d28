use anyhow::{Context, Result};
use std::fmt::Write as _;

/// Where a slot records which channel and build it carries, relative to the
/// slot root.
pub const CHANNEL_CONFIG_PATH: &str = "etc/system-image/channel.ini";

/// Channel and build number of the image in one slot. A slot without a
/// config file has the default descriptor (no channel, build 0).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotDescriptor {
    pub channel: String,
    pub build_number: u64,
}

impl SlotDescriptor {
    pub fn new(channel: impl Into<String>, build_number: u64) -> Self {
        Self {
            channel: channel.into(),
            build_number,
        }
    }

    /// Reads `key: value` lines; section headers, comments and unknown keys
    /// are ignored.
    pub fn parse(content: &str) -> Result<Self> {
        let mut descriptor = SlotDescriptor::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('[') || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key.trim() {
                "channel" => descriptor.channel = value.trim().to_string(),
                "build_number" => {
                    descriptor.build_number = value
                        .trim()
                        .parse()
                        .with_context(|| format!("Invalid build_number {:?}", value.trim()))?;
                }
                _ => {}
            }
        }
        Ok(descriptor)
    }

    pub fn to_ini(&self) -> String {
        let mut out = String::from("[service]\n");
        let _ = writeln!(out, "channel: {}", self.channel);
        let _ = writeln!(out, "build_number: {}", self.build_number);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_channel_ini() {
        let ini = "[service]\n\
                   base: system-image.ubuntu.com\n\
                   http_port: 80\n\
                   channel: ubuntu-core/devel-proposed\n\
                   device: generic_amd64\n\
                   build_number: 101\n";

        let descriptor = SlotDescriptor::parse(ini).unwrap();
        assert_eq!(
            descriptor,
            SlotDescriptor::new("ubuntu-core/devel-proposed", 101)
        );
    }

    #[test]
    fn test_parse_missing_keys_defaults() {
        let descriptor = SlotDescriptor::parse("[service]\n# nothing\n").unwrap();
        assert_eq!(descriptor, SlotDescriptor::default());
    }

    #[test]
    fn test_parse_bad_build_number() {
        assert!(SlotDescriptor::parse("build_number: soon\n").is_err());
    }

    #[test]
    fn test_to_ini_parses_back() {
        let descriptor = SlotDescriptor::new("stable", 7);
        assert_eq!(
            SlotDescriptor::parse(&descriptor.to_ini()).unwrap(),
            descriptor
        );
    }
}
