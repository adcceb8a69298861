pub mod application;
pub mod chunking;
pub mod connection;
pub mod editing;
pub mod errors;
pub mod gitops;
pub mod indexes;
pub mod locking;
pub mod parsing;
pub mod protocol;
pub mod repo;
pub mod session;
pub mod stdio;
pub mod tools;
pub mod webserver;
