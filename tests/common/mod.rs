//! Shared fixtures for the integration tests.
//!
//! `MdsvexDoc` generates random mdsvex documents from a fixed set of
//! Markdown and Svelte building blocks, joined with a mix of line breaks.

#![allow(dead_code)]

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use quickcheck::{Arbitrary, Gen};

use mdsvex_language_server::grammar::{Grammar, BUNDLED_GRAMMAR};
use mdsvex_language_server::language_regions::LanguageRegions;

static BUNDLED: Lazy<Arc<Grammar>> =
    Lazy::new(|| Arc::new(Grammar::from_json(BUNDLED_GRAMMAR).expect("bundled grammar compiles")));

/// Region engine over the bundled mdsvex grammar.
pub fn bundled_regions() -> LanguageRegions {
    LanguageRegions::new(BUNDLED.clone())
}

const MAX_BLOCKS: usize = 8;

const BLOCKS: &[&str] = &[
    "# Title",
    "## Hello {name}",
    "Some *emphasis* and **strong** text.",
    "A [link](https://example.com) and `code {x}`.",
    "Hello {user.name}!",
    "<Widget foo={1} />",
    "<Chart\n  data={points}\n/>",
    "<script>\n  let count = 0;\n</script>",
    "<style>\n  h1 { color: red; }\n</style>",
    "{#if visible}\n<p>Shown</p>\n{:else}\nHidden\n{/if}",
    "{#each items as item}\n- {item}\n{/each}",
    "```js\nconst x = {a: 1};\n```",
    "> quoted {value} text",
    "- list item",
    "1. numbered",
    "<!-- comment {ignored} -->",
    "<svelte:head><title>Page</title></svelte:head>",
    "café ☕ naïve",
    "emoji 😀 {'😀'} 🎉",
    "{fn({a: 'b}'})}",
    "",
    "   ",
];

const TERMINATORS: &[&str] = &["\n", "\n", "\r\n", "\r"];

/// A random mdsvex document.
#[derive(Clone)]
pub struct MdsvexDoc {
    pub text: String,
}

impl fmt::Debug for MdsvexDoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.text)
    }
}

impl Arbitrary for MdsvexDoc {
    fn arbitrary(g: &mut Gen) -> Self {
        let count = usize::arbitrary(g) % (MAX_BLOCKS + 1);
        let mut text = String::new();
        if bool::arbitrary(g) && bool::arbitrary(g) {
            text.push_str("---\ntitle: {not svelte}\n---\n");
        }
        for i in 0..count {
            if i > 0 {
                text.push_str(g.choose(TERMINATORS).unwrap());
            }
            let block = g.choose(BLOCKS).unwrap();
            let terminator = g.choose(TERMINATORS).unwrap();
            text.push_str(&block.replace('\n', terminator));
        }
        if bool::arbitrary(g) {
            text.push_str(g.choose(TERMINATORS).unwrap());
        }
        MdsvexDoc { text }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        let text = self.text.clone();
        let lines: Vec<&str> = text.split('\n').collect();
        let candidates: Vec<MdsvexDoc> = (0..lines.len())
            .filter(|_| lines.len() > 1)
            .map(|skip| {
                let kept: Vec<&str> = lines
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != skip)
                    .map(|(_, line)| *line)
                    .collect();
                MdsvexDoc { text: kept.join("\n") }
            })
            .collect();
        Box::new(candidates.into_iter())
    }
}

/// A document of spaces and line breaks only.
#[derive(Clone, Debug)]
pub struct BlankDoc {
    pub text: String,
}

impl Arbitrary for BlankDoc {
    fn arbitrary(g: &mut Gen) -> Self {
        let lines = usize::arbitrary(g) % 10;
        let mut text = String::new();
        for _ in 0..lines {
            text.push_str(&" ".repeat(usize::arbitrary(g) % 12));
            text.push_str(g.choose(TERMINATORS).unwrap());
        }
        text.push_str(&" ".repeat(usize::arbitrary(g) % 4));
        BlankDoc { text }
    }
}

pub fn utf16_units(text: &str) -> Vec<u16> {
    text.encode_utf16().collect()
}
