//! The plugins bundled with the bot.

pub mod ctcp;
pub mod help;
pub mod oneliner;
pub mod poll;
pub mod printer;
