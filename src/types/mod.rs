//! Domain types shared across the bot.

mod branch;
mod proposal;

pub use branch::{Branch, BranchName, Slug};
pub use proposal::{Comment, MergeProposal};
