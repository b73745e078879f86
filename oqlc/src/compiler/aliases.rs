use indexmap::IndexMap;

/// Deterministic alias generator: `hint` → `hint~n`.
///
/// One generator per environment; aliases are assigned in discovery order
/// for a given IR, which keeps compilations reproducible byte-for-byte.
#[derive(Debug, Clone, Default)]
pub struct AliasGenerator {
    counts: IndexMap<String, usize>,
}

impl AliasGenerator {
    pub fn new() -> AliasGenerator {
        AliasGenerator::default()
    }

    pub fn get(&mut self, hint: &str) -> String {
        let count = self.counts.entry(hint.to_string()).or_insert(0);
        *count += 1;
        format!("{hint}~{count}")
    }

    /// An anonymous alias.
    pub fn anon(&mut self) -> String {
        self.get("v")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn aliases_are_unique_and_deterministic() {
        let mut gen = AliasGenerator::new();
        assert_eq!(gen.get("movie"), "movie~1");
        assert_eq!(gen.get("movie"), "movie~2");
        assert_eq!(gen.get("title"), "title~1");
        assert_eq!(gen.anon(), "v~1");

        let mut second = AliasGenerator::new();
        assert_eq!(second.get("movie"), "movie~1");
    }
}
