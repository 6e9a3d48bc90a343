pub mod basic_auth;
