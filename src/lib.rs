//! GenAI chat bot: Bot Framework transport in front of pluggable generative backends.

// Interdiction stricte de pratiques dangereuses ou non idiomatiques
#![deny(unsafe_code)] // Le code unsafe est interdit
#![warn(missing_docs)] // Toute fonction, struct, enum ou module public doit être documenté
#![warn(dead_code)] // Le code inutilisé est signalé
#![deny(non_camel_case_types)]
// Les types doivent suivre la convention CamelCase

// Options supplémentaires
#![warn(unused_imports)] // Les imports inutilisés sont signalés
#![warn(unused_variables)] // Les variables inutilisées sont signalées
#![deny(unused_must_use)] // Oblige à gérer explicitement les Result et Option
#![deny(non_snake_case)] // Les noms de variables et fonctions doivent être en snake_case
#![deny(non_upper_case_globals)] // Les constantes et globals doivent être en MAJUSCULE
#![deny(nonstandard_style)] // Empêche tout style de code non standard
#![forbid(unsafe_op_in_unsafe_fn)]

// Clippy pour stricte discipline
#![warn(clippy::all)] // Active toutes les lints Clippy standard
#![warn(clippy::pedantic)] // Active les lints très strictes de Clippy
#![deny(clippy::unwrap_used)] // Interdit unwrap()
#![deny(clippy::expect_used)] // Interdit expect()
#![deny(clippy::panic)] // Interdit panic!()
#![deny(clippy::print_stdout)] // Interdit println!() en production
#![deny(clippy::todo)] // Interdit les TODO dans le code
#![deny(clippy::unimplemented)] // Interdit les fonctions non implémentées
#![deny(clippy::unwrap_in_result)] // Interdit unwrap() sur Result
#![deny(clippy::redundant_clone)] // Interdit les clones inutiles
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

/// Single sign-on gate.
pub mod auth;
/// Backend adapter over the generative services.
pub mod backend;
/// Turn handler and commands.
pub mod bot;
/// Conversation history, sessions and storage.
pub mod conversation;
/// Configuration and errors.
pub mod core;
/// Clients for chat completions, assistants and custom endpoints.
pub mod llm;
/// HTTP server and API routes.
#[allow(clippy::missing_errors_doc, clippy::unused_async)]
pub mod server;
/// Entry helpers to start the bot server.
pub mod start_genai_bot;
/// Streaming run events, tools and the run driver.
pub mod stream;
/// Bot Framework activities, connector and streaming replies.
pub mod transport;

#[cfg(test)]
mod test_support;
