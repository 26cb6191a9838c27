use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::{Captures, Regex};

/// Probability that a caption opens with an attention-grabbing intro
const INTRO_PROBABILITY: f64 = 0.8;

/// Longest caption text, hashtag block excluded, before truncation kicks in
const MAX_CAPTION_CHARS: usize = 150;

/// Handles of Madrid emergency services, expanded to readable names
const MENTION_NAMES: &[(&str, &str)] = &[
    ("bomberosmad", "Bomberos de Madrid"),
    ("aborprl", "Bomberos de Madrid"),
    ("aborprl_mad", "Bomberos de Madrid"),
    ("emergenciasmad", "Emergencias Madrid"),
    ("samurpc", "SAMUR Protección Civil"),
    ("polaborprl", "Policía Municipal"),
];

/// Multi-word verb phrases and their stand-ins
const PHRASE_SYNONYMS: &[(&str, &[&str])] = &[
    ("se ha producido", &["ha tenido lugar", "se ha registrado", "ha ocurrido"]),
    ("se desplazan", &["acuden", "se dirigen"]),
    ("ha sido", &["fue", "resultó"]),
];

/// Single words swapped during paraphrasing
const WORD_SYNONYMS: &[(&str, &[&str])] = &[
    ("trabajan", &["intervienen", "actúan", "operan"]),
    ("trabaja", &["interviene", "actúa"]),
    ("atienden", &["asisten", "auxilian", "socorren"]),
    ("atiende", &["asiste", "auxilia"]),
    ("hay", &["se registran", "se reportan"]),
    ("incendio", &["fuego", "siniestro"]),
    ("accidente", &["siniestro vial", "percance"]),
    ("heridos", &["lesionados", "afectados"]),
    ("herido", &["lesionado", "afectado"]),
    ("vehículos", &["coches", "automóviles"]),
    ("vehículo", &["coche", "automóvil"]),
    ("edificio", &["inmueble", "bloque"]),
    ("vivienda", &["casa"]),
];

const INTRO_LINES: &[&str] = &[
    "ATENCIÓN",
    "ÚLTIMA HORA",
    "URGENTE",
    "ALERTA EN MADRID",
    "SUCESO AHORA",
    "ESTO ACABA DE PASAR",
    "NOTICIA DE ÚLTIMA HORA",
];

const CLOSING_LINES: &[&str] = &[
    "Más información en breve.",
    "Os mantendremos informados.",
    "Seguimos pendientes.",
    "Ampliamos información.",
    "",
];

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());
static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\w+)").unwrap());
static HASHTAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(\w+)").unwrap());

static PHRASE_RULES: Lazy<Vec<(Regex, &'static [&'static str])>> = Lazy::new(|| {
    PHRASE_SYNONYMS
        .iter()
        .map(|(phrase, options)| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(phrase));
            (Regex::new(&pattern).unwrap(), *options)
        })
        .collect()
});

/// Turns raw tweet text into overlay, narration and caption text
///
/// Cleaning happens in a fixed order: URLs out, mentions expanded to display
/// names, hashtag markers dropped, emoji removed, then whitespace collapsed.
/// Paraphrasing only ever touches known filler words, never proper nouns or
/// numbers.
pub struct CaptionRewriter {
    default_hashtags: Vec<String>,
}

impl CaptionRewriter {
    pub fn new(default_hashtags: Vec<String>) -> Self {
        Self { default_hashtags }
    }

    /// Cleaned text without the paraphrase pass; used for overlay and narration
    pub fn clean(&self, raw: &str) -> String {
        let text = URL_RE.replace_all(raw, " ");
        let text = MENTION_RE.replace_all(&text, |caps: &Captures| expand_mention(&caps[1]));
        let text = HASHTAG_RE.replace_all(&text, "$1");
        // Emoji sit above the Basic Multilingual Plane; drawtext renders them
        // as tofu and the TTS voice reads them aloud
        let text: String = text.chars().filter(|c| (*c as u32) <= 0xFFFF).collect();
        collapse_whitespace(&text)
    }

    /// Cleaned and paraphrased text
    pub fn rewrite(&self, raw: &str) -> String {
        self.rewrite_with_rng(raw, &mut rand::thread_rng())
    }

    pub fn rewrite_with_rng<R: Rng + ?Sized>(&self, raw: &str, rng: &mut R) -> String {
        paraphrase(&self.clean(raw), rng)
    }

    /// Full caption for publishing: intro, rewritten body, closing, hashtags
    pub fn compose_caption(&self, raw: &str) -> String {
        self.compose_caption_with_rng(raw, &mut rand::thread_rng())
    }

    pub fn compose_caption_with_rng<R: Rng + ?Sized>(&self, raw: &str, rng: &mut R) -> String {
        let hashtags = self.default_hashtags.join(" ");
        let body = self.rewrite_with_rng(raw, rng);

        if body.is_empty() {
            return hashtags;
        }

        let mut parts: Vec<&str> = Vec::new();
        if rng.gen_bool(INTRO_PROBABILITY) {
            parts.push(INTRO_LINES.choose(rng).copied().unwrap_or(""));
        }
        parts.push(&body);
        let closing = CLOSING_LINES.choose(rng).copied().unwrap_or("");
        if !closing.is_empty() {
            parts.push(closing);
        }

        // The length cap covers intro, body and closing together
        let caption = truncate_chars(&parts.join(" "), MAX_CAPTION_CHARS);

        if hashtags.is_empty() {
            caption
        } else {
            format!("{caption}\n\n{hashtags}")
        }
    }
}

fn expand_mention(handle: &str) -> String {
    let key = handle.to_lowercase();
    MENTION_NAMES
        .iter()
        .find(|(known, _)| *known == key)
        .map(|(_, name)| name.to_string())
        // Unknown handles keep their text so the sentence stays readable
        .unwrap_or_else(|| handle.to_string())
}

fn paraphrase<R: Rng + ?Sized>(text: &str, rng: &mut R) -> String {
    let text = apply_phrase_synonyms(text, rng);

    let mut words: Vec<String> = Vec::new();
    let mut sentence_start = true;

    for token in text.split_whitespace() {
        let (prefix, core, suffix) = split_punctuation(token);

        let rewritten = if core.is_empty() || is_protected(core, sentence_start) {
            core.to_string()
        } else {
            match word_options(core) {
                Some(options) => {
                    let pick = options.choose(rng).copied().unwrap_or(core);
                    match_case(core, pick)
                }
                None => core.to_string(),
            }
        };

        words.push(format!("{prefix}{rewritten}{suffix}"));
        sentence_start = ends_sentence(suffix);
    }

    words.join(" ")
}

fn apply_phrase_synonyms<R: Rng + ?Sized>(text: &str, rng: &mut R) -> String {
    let mut result = text.to_string();
    for (re, options) in PHRASE_RULES.iter() {
        if !re.is_match(&result) {
            continue;
        }
        let pick = options.choose(rng).copied().unwrap_or_default();
        result = re
            .replace_all(&result, |caps: &Captures| match_case(&caps[0], pick))
            .into_owned();
    }
    result
}

/// Tokens that paraphrasing must leave alone: numbers, acronyms, and
/// capitalized words that are not just opening a sentence
fn is_protected(core: &str, sentence_start: bool) -> bool {
    if core.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }

    let chars: Vec<char> = core.chars().collect();
    if chars.len() > 1 && chars.iter().all(|c| c.is_uppercase()) {
        return true;
    }

    !sentence_start && chars.first().is_some_and(|c| c.is_uppercase())
}

fn word_options(core: &str) -> Option<&'static [&'static str]> {
    let key = core.to_lowercase();
    WORD_SYNONYMS
        .iter()
        .find(|(word, _)| *word == key)
        .map(|(_, options)| *options)
}

fn split_punctuation(token: &str) -> (&str, &str, &str) {
    let start = match token.find(|c: char| c.is_alphanumeric()) {
        Some(i) => i,
        None => return (token, "", ""),
    };

    let end = token
        .char_indices()
        .filter(|(_, c)| c.is_alphanumeric())
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(token.len());

    (&token[..start], &token[start..end], &token[end..])
}

fn ends_sentence(suffix: &str) -> bool {
    suffix.contains(['.', '!', '?'])
}

/// Carry the original's leading capital over to the replacement
fn match_case(original: &str, replacement: &str) -> String {
    let starts_upper = original.chars().next().is_some_and(char::is_uppercase);
    if !starts_upper {
        return replacement.to_string();
    }

    let mut chars = replacement.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }

    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rewriter() -> CaptionRewriter {
        CaptionRewriter::new(vec![
            "#sucesoshoy".to_string(),
            "#madrid".to_string(),
            "#emergencias".to_string(),
        ])
    }

    #[test]
    fn hashtag_tokens_lose_only_the_marker() {
        assert_eq!(rewriter().clean("#Incendio en #Madrid"), "Incendio en Madrid");
    }

    #[test]
    fn known_mentions_expand_to_display_names() {
        assert_eq!(
            rewriter().clean("@BomberosMad trabaja en la zona"),
            "Bomberos de Madrid trabaja en la zona"
        );
    }

    #[test]
    fn unknown_mentions_keep_the_handle_text() {
        assert_eq!(rewriter().clean("@DesconocidoXYZ informa del corte"), "DesconocidoXYZ informa del corte");
    }

    #[test]
    fn urls_are_stripped() {
        assert_eq!(
            rewriter().clean("Incendio controlado https://t.co/a1B2c3 en Usera"),
            "Incendio controlado en Usera"
        );
    }

    #[test]
    fn cleaning_is_idempotent() {
        let once = rewriter().clean("@SamurPC atiende #accidente https://t.co/xyz en M-30");
        assert_eq!(rewriter().clean(&once), once);
    }

    #[test]
    fn paraphrase_preserves_proper_nouns_and_numbers() {
        let text = "SAMUR atiende a 2 heridos en la calle Alcalá 123";
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let rewritten = rewriter().rewrite_with_rng(text, &mut rng);
            assert!(rewritten.contains("SAMUR"), "seed {seed}: {rewritten}");
            assert!(rewritten.contains("Alcalá"), "seed {seed}: {rewritten}");
            assert!(rewritten.contains(" 2 "), "seed {seed}: {rewritten}");
            assert!(rewritten.contains("123"), "seed {seed}: {rewritten}");
        }
    }

    #[test]
    fn paraphrase_keeps_sentence_capitalization() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let rewritten = rewriter().rewrite_with_rng("Incendio en una vivienda de Vallecas", &mut rng);
            let first = rewritten.chars().next().unwrap();
            assert!(first.is_uppercase(), "seed {seed}: {rewritten}");
            assert!(rewritten.contains("Vallecas"), "seed {seed}: {rewritten}");
        }
    }

    #[test]
    fn caption_appends_hashtags_and_truncates_long_bodies() {
        let long_text = "palabra ".repeat(60);
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let caption = rewriter().compose_caption_with_rng(&long_text, &mut rng);

            let (text, tags) = caption.split_once("\n\n").unwrap();
            assert!(text.contains("..."), "seed {seed}: {caption}");
            assert!(
                text.chars().count() <= MAX_CAPTION_CHARS,
                "seed {seed}: {} chars: {text}",
                text.chars().count()
            );
            assert_eq!(tags, "#sucesoshoy #madrid #emergencias");
        }
    }

    #[test]
    fn caption_intro_joins_with_a_plain_space() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let caption =
                rewriter().compose_caption_with_rng("Incendio en una vivienda de Vallecas", &mut rng);
            let (text, _) = caption.split_once("\n\n").unwrap();

            assert!(!text.contains(':'), "seed {seed}: {caption}");
            if let Some(intro) = INTRO_LINES.iter().find(|line| text.starts_with(**line)) {
                assert!(text[intro.len()..].starts_with(' '), "seed {seed}: {caption}");
            }
        }
    }

    #[test]
    fn caption_for_empty_text_is_just_hashtags() {
        let mut rng = StdRng::seed_from_u64(1);
        let caption = rewriter().compose_caption_with_rng("https://t.co/abc", &mut rng);
        assert_eq!(caption, "#sucesoshoy #madrid #emergencias");
    }

    #[test]
    fn emoji_are_stripped_during_cleaning() {
        assert_eq!(
            rewriter().clean("🚨 Incendio en la calle Alcalá 🚒 https://t.co/x"),
            "Incendio en la calle Alcalá"
        );
    }

    #[test]
    fn rewriting_handles_arbitrary_unicode() {
        let weird = "🚒🔥 @BomberosMad ¡¡atención!! — مرحبا #übung https://t.co/x";
        let mut rng = StdRng::seed_from_u64(7);
        let rewritten = rewriter().rewrite_with_rng(weird, &mut rng);
        assert!(!rewritten.contains('🚒'));
        assert!(!rewritten.contains('🔥'));
        assert!(!rewritten.contains('@'));
        assert!(!rewritten.contains('#'));
        assert!(!rewritten.contains("https://"));
        // Text inside the Basic Multilingual Plane survives the emoji strip
        assert!(rewritten.contains("مرحبا"));
    }
}
