//! Component G: per-function metadata tags. One entry = one tag string;
//! metadata namespace prefixing (e.g. a `jit::` prefix) is the caller's
//! concern, not this parser's (spec.md §4.G / §6).

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FnConfig {
    pub ignore_perf_warnings: bool,
    pub disable_jit: bool,
    pub dump_c: bool,
}

impl FnConfig {
    /// Parses every tag in `tags`, applying recognized ones and silently
    /// ignoring the rest.
    pub fn from_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> FnConfig {
        let mut config = FnConfig::default();
        for tag in tags {
            config.apply_tag(tag);
        }
        config
    }

    fn apply_tag(&mut self, tag: &str) {
        match tag {
            "ignore_perf_warnings" => self.ignore_perf_warnings = true,
            "disable_jit" => self.disable_jit = true,
            "dump_c" => self.dump_c = true,
            _ => {} // unknown tags are ignored silently
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_every_documented_tag() {
        let config = FnConfig::from_tags(["disable_jit", "dump_c", "ignore_perf_warnings"]);
        assert_eq!(
            config,
            FnConfig {
                ignore_perf_warnings: true,
                disable_jit: true,
                dump_c: true,
            }
        );
    }

    #[test]
    fn unknown_tags_are_ignored() {
        let config = FnConfig::from_tags(["jit::disable_jit", "nonsense", ""]);
        assert_eq!(config, FnConfig::default());
    }

    #[test]
    fn empty_tag_list_is_all_defaults() {
        assert_eq!(FnConfig::from_tags(std::iter::empty()), FnConfig::default());
    }
}
