//! Datalog evaluation through a relational algebra machine (RAM).
//!
//! Rules are compiled to a naive semi-naive RAM program, tests are hoisted to the outermost loop
//! that binds their inputs, indexes are chosen for the resulting queries and the program is
//! lowered to slot and index addressed form, which [`run`] interprets.

pub mod boxing;
pub mod datalog;
mod debug;
pub mod demo;
pub mod executable;
pub mod hoisting;
pub mod ids;
pub mod index_selection;
pub mod interpret;
pub mod lowering;
pub mod predicates;
pub mod ram;
pub mod typed_set;
pub mod typed_vec;
pub mod union_find;

#[cfg(test)]
mod pipeline_tests;

use crate::{datalog::Datalog, interpret::Solution, predicates::Predicates, ram::Facts};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Configuration {
    /// Run the hoisting pass. Without it every loop is a full scan.
    pub hoisting: bool,
    /// Dump every intermediate program through `tracing`.
    pub dump_phases: bool,
}
impl Default for Configuration {
    fn default() -> Self {
        Self {
            hoisting: true,
            dump_phases: false,
        }
    }
}

/// RAM of `program` with indexes placed, ready for lowering.
pub fn compile_ram(config: &Configuration, program: &Datalog, facts: Facts) -> ram::RamProgram {
    let program = debug::notify_pre_solve(config, program);
    let predicates = Predicates::initialize(program, &facts);
    let ram = datalog::compile(program, facts, predicates);
    let ram = if config.hoisting {
        hoisting::hoist(ram)
    } else {
        ram
    };
    index_selection::place_indexes(ram)
}

pub fn compile_with(
    config: &Configuration,
    program: &Datalog,
    facts: Facts,
) -> executable::Program {
    let ram = compile_ram(config, program, facts);
    let ram = debug::notify_pre_lowering(config, ram);
    let program = lowering::lower(ram);
    debug::notify_pre_interpret(config, program)
}

#[must_use]
pub fn compile(program: &Datalog, facts: Facts) -> executable::Program {
    compile_with(&Configuration::default(), program, facts)
}

pub fn run(config: &Configuration, program: &executable::Program) -> Solution {
    debug::notify_post_solve(config, interpret::interpret(program))
}

/// Compile and run with the default configuration.
#[must_use]
pub fn solve(program: &Datalog, facts: Facts) -> Solution {
    let config = Configuration::default();
    run(&config, &compile_with(&config, program, facts))
}
