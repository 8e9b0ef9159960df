//! Shared UI icons and emojis.

use console::Emoji;

// Step outcomes
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[--]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Step phases
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[R]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");
