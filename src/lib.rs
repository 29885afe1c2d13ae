pub mod chain;

pub mod client;

pub mod deployment;

pub mod evm;

pub mod subscription;

pub mod ui;

pub mod view;

pub mod wallets;

pub mod test_helpers;
