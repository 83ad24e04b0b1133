//! Core library for pgforge: a declarative PostgreSQL provisioning pipeline.
//!
//! A provisioning request (engine version, instance type, replica count,
//! tuning settings) is turned into Terraform and Ansible artifacts, and the
//! external tools are then driven against those artifacts in a fixed order:
//! generate, apply, inventory, configure.

pub mod artifact;
pub mod config;
pub mod invoke;
pub mod pipeline;
pub mod render;
pub mod request;
pub mod topology;
