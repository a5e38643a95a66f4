//! Inbound/outbound channels: the web gateway and the Telegram bot.

pub mod telegram;
pub mod web;
