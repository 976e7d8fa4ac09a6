//! Locale-specific soft-reboot banners.
//!
//! CircuitPython localizes the "soft reboot" line it prints after Ctrl-D, so
//! banner detection must use the *device's* locale, not the host's. Lookup
//! order: exact tag, then language prefix ("de_DE" -> "de"), then English.

/// English banner, also the fallback for unknown locales.
pub const DEFAULT_BANNER: &[u8] = b"soft reboot\r\n";

const CATALOG: &[(&str, &[u8])] = &[
    ("ID", b"memulai ulang software(soft reboot)\r\n"),
    ("de", b"weicher reboot\r\n"),
    ("en", DEFAULT_BANNER),
    ("es", b"reinicio suave\r\n"),
    ("fil", b"malambot na reboot\r\n"),
    ("fr", "redémarrage logiciel\r\n".as_bytes()),
    ("ja", "ソフトリブート\r\n".as_bytes()),
    ("nl", b"zachte herstart\r\n"),
    ("pl", b"programowy reset\r\n"),
    ("pt", "reinicialização soft\r\n".as_bytes()),
    ("ru", "Мягкая перезагрузка\r\n".as_bytes()),
    ("sv", b"mjuk omstart\r\n"),
    ("zh_Latn_pinyin", "ruǎn chóngqǐ\r\n".as_bytes()),
];

/// Resolve the boot banner for a locale tag.
pub fn banner_for(locale: &str) -> &'static [u8] {
    if let Some(banner) = lookup(locale) {
        return banner;
    }
    if let Some(lang) = locale.split('_').next() {
        if let Some(banner) = lookup(lang) {
            return banner;
        }
    }
    DEFAULT_BANNER
}

/// True when the tag (or its language prefix) is in the catalog.
pub fn is_known(locale: &str) -> bool {
    lookup(locale).is_some()
        || locale
            .split('_')
            .next()
            .and_then(lookup)
            .is_some()
}

fn lookup(tag: &str) -> Option<&'static [u8]> {
    CATALOG
        .iter()
        .find(|(name, _)| *name == tag)
        .map(|(_, banner)| *banner)
}
