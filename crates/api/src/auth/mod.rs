//! Access-token verification ([`jwt`]).

pub mod jwt;
