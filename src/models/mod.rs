pub mod comment;
pub mod document;
pub mod folder;
pub mod permission;
pub mod share;
pub mod user;
