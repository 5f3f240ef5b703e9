//! Hooks between the phases of [`crate::compile_with`] and [`crate::run`].
//!
//! Each hook returns its input unchanged and dumps it when [`Configuration::dump_phases`] is set.

use crate::{
    Configuration, datalog::Datalog, executable::Program, interpret::Solution, ram::RamProgram,
};
use itertools::Itertools as _;

pub fn notify_pre_solve<'a>(config: &Configuration, program: &'a Datalog) -> &'a Datalog {
    if config.dump_phases {
        let strata = program
            .strata
            .iter()
            .enumerate()
            .map(|(i, rules)| format!("stratum {i}:\n{}", rules.iter().join("\n")))
            .join("\n");
        tracing::info!("rules\n{strata}");
    }
    program
}

pub fn notify_pre_lowering(config: &Configuration, program: RamProgram) -> RamProgram {
    if config.dump_phases {
        tracing::info!("ram\n{}", program.stmt);
    }
    program
}

pub fn notify_pre_interpret(config: &Configuration, program: Program) -> Program {
    if config.dump_phases {
        tracing::info!("executable ram\n{}", program.dbg_summary());
    }
    program
}

pub fn notify_post_solve(config: &Configuration, solution: Solution) -> Solution {
    if config.dump_phases {
        for (rel, facts) in &solution.relations {
            tracing::info!("{rel}: {} facts", facts.len());
        }
    }
    solution
}
