pub mod generic;
pub mod languages;
pub mod regex_lang;
pub mod types;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tracing::warn;

use self::generic::GenericParser;
use self::languages::{grammar_configs, GrammarParser};
use self::regex_lang::RegexParser;
use self::types::CodeFile;

/// A parser turns `(content, path)` into a `CodeFile`. Implementations are
/// pure: identical inputs produce identical outputs, which is what makes
/// document ids reproducible across runs.
pub trait Parser: Send + Sync {
    fn language(&self) -> &str;
    fn parse(&self, content: &str, path: &str) -> CodeFile;
}

/// Grammar extractor with a regex safety net. The grammar side runs under
/// `catch_unwind`; any panic or refusal to produce a tree silently degrades
/// to the regex result. Parse failures never propagate out of this type.
struct SafeParser {
    grammar: GrammarParser,
    fallback: Arc<dyn Parser>,
}

impl Parser for SafeParser {
    fn language(&self) -> &str {
        self.grammar.language()
    }

    fn parse(&self, content: &str, path: &str) -> CodeFile {
        let attempt = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.grammar.extract(content, path)
        }));
        match attempt {
            Ok(Some(file)) => file,
            Ok(None) => {
                warn!(language = self.language(), path, "grammar produced no tree, using regex fallback");
                self.fallback.parse(content, path)
            }
            Err(_) => {
                warn!(language = self.language(), path, "grammar extractor panicked, using regex fallback");
                self.fallback.parse(content, path)
            }
        }
    }
}

/// Maps a language tag to its parser. Grammar-backed languages get the safe
/// grammar-first parser, languages with only regex rules get those, and
/// everything else degrades to the generic comment scanner.
pub struct ParserRegistry {
    parsers: HashMap<&'static str, Arc<dyn Parser>>,
    generic: Arc<dyn Parser>,
}

impl ParserRegistry {
    pub fn init() -> Self {
        let generic: Arc<dyn Parser> = Arc::new(GenericParser);
        let mut parsers: HashMap<&'static str, Arc<dyn Parser>> = HashMap::new();

        for spec in regex_lang::all_specs() {
            parsers.insert(spec.language, Arc::new(RegexParser::new(spec)) as Arc<dyn Parser>);
        }

        for config in grammar_configs() {
            let tag = config.language_ids[0];
            match GrammarParser::from_config(&config) {
                Ok(grammar) => {
                    let fallback = parsers.get(tag).cloned().unwrap_or_else(|| generic.clone());
                    parsers.insert(
                        tag,
                        Arc::new(SafeParser { grammar, fallback }) as Arc<dyn Parser>,
                    );
                }
                Err(err) => {
                    // queries failing to compile against their own grammar is
                    // a build-time bug; keep serving with the regex parser
                    warn!(%err, language = tag, "grammar queries failed to compile");
                }
            }
        }

        Self { parsers, generic }
    }

    pub fn parser_for(&self, language: &str) -> Arc<dyn Parser> {
        self.parsers
            .get(language)
            .cloned()
            .unwrap_or_else(|| self.generic.clone())
    }

    pub fn parse(&self, language: &str, content: &str, path: &str) -> CodeFile {
        self.parser_for(language).parse(content, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::language::GENERIC;

    #[test]
    fn registry_covers_grammar_regex_and_generic() {
        let registry = ParserRegistry::init();
        assert_eq!(registry.parser_for("rust").language(), "rust");
        assert_eq!(registry.parser_for("java").language(), "java");
        assert_eq!(registry.parser_for("brainfuck").language(), GENERIC);
    }

    #[test]
    fn unknown_language_extracts_comments_only() {
        let registry = ParserRegistry::init();
        let file = registry.parse("weird", "// note\nsomething\n", "a.weird");
        assert_eq!(file.comments.len(), 1);
        assert!(file.functions.is_empty());
    }

    #[test]
    fn go_parse_through_registry() {
        let registry = ParserRegistry::init();
        let file = registry.parse("go", "func Hello() {}\n", "main.go");
        assert_eq!(file.functions.len(), 1);
        assert_eq!(file.functions[0].name, "Hello");
        assert_eq!(file.functions[0].start_line, 1);
    }

    #[test]
    fn identical_inputs_identical_outputs() {
        let registry = ParserRegistry::init();
        let a = registry.parse("rust", "fn one() {}\n", "src/a.rs");
        let b = registry.parse("rust", "fn one() {}\n", "src/a.rs");
        assert_eq!(a.functions, b.functions);
        assert_eq!(a.content_hash, b.content_hash);
    }
}
