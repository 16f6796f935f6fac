// Library for tests to access modules

pub mod catalog;
pub mod config;
pub mod event;
pub mod feed;
pub mod member;
pub mod observer;
pub mod resource;
pub mod routes;
pub mod tally;
