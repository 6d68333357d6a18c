// Localized pages carry their language as a title suffix, e.g.
// "Systemd (Español)". Anything without a recognized suffix is English.
const LANGUAGE_NAMES: &[&str] = &[
    "English",
    "العربية",
    "Bosanski",
    "Български",
    "Català",
    "Čeština",
    "Dansk",
    "Deutsch",
    "Ελληνικά",
    "Español",
    "Esperanto",
    "Français",
    "עברית",
    "Hrvatski",
    "Magyar",
    "Bahasa Indonesia",
    "Italiano",
    "日本語",
    "한국어",
    "Lietuviškai",
    "Norsk Bokmål",
    "Nederlands",
    "Polski",
    "Português",
    "Română",
    "Русский",
    "Slovenčina",
    "Српски",
    "Suomi",
    "Svenska",
    "ไทย",
    "Türkçe",
    "Українська",
    "Tiếng Việt",
    "简体中文",
    "正體中文",
];

pub const DEFAULT_LANGUAGE: &str = "English";

pub fn detect_language(title: &str) -> (&str, &'static str) {
    if let Some(open) = title.rfind(" (")
        && let Some(inner) = title[open + 2..].strip_suffix(')')
        && let Some(name) = LANGUAGE_NAMES.iter().find(|name| **name == inner)
    {
        return (&title[..open], name);
    }
    (title, DEFAULT_LANGUAGE)
}

pub fn localize_template(base: &str, language: &str) -> String {
    if language == DEFAULT_LANGUAGE {
        base.to_string()
    } else {
        format!("{base} ({language})")
    }
}
