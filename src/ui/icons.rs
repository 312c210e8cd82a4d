//! Shared UI icons and emojis.
//!
//! Each icon has a plain-text fallback for terminals without emoji support.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");
pub static STOP: Emoji<'_, '_> = Emoji("⛔ ", "[X]");

// Rotation indicators
pub static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[?]");
pub static ROTATE: Emoji<'_, '_> = Emoji("🔁 ", "[>]");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "[IP]");
pub static PLUG: Emoji<'_, '_> = Emoji("🔌 ", "[-]");
pub static EYES: Emoji<'_, '_> = Emoji("👀 ", "[V]");

// Summary indicators
pub static CHART: Emoji<'_, '_> = Emoji("📊 ", "");
pub static LINK: Emoji<'_, '_> = Emoji("🔗 ", "");
pub static TARGET: Emoji<'_, '_> = Emoji("🎯 ", "");
pub static TREND: Emoji<'_, '_> = Emoji("📈 ", "");
pub static CLOCK: Emoji<'_, '_> = Emoji("🕒 ", "");
