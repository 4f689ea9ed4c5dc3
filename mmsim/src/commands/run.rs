//! Run command implementation.
//!
//! Simulates a host event loop: every iteration allocates one object of the
//! workload and hands control to `on_event_loop()`, so collections happen in
//! slices between allocations the way an embedding runtime drives them.

use std::time::Instant;

use mmgc::heap::AVAILABLE_SLOTS;
use mmgc::{MemoryManager, MemoryStatistics, MmConfig, PersistentId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Result, SimError};
use crate::workload::{BLOB, NODE};

/// Nodes linked into one group; groups never reference each other.
const GROUP_LEN: usize = 8;

/// Arguments for the run command.
#[derive(Debug, Clone)]
pub struct RunArgs {
    /// Objects allocated per round.
    pub objects: usize,
    /// Number of rounds.
    pub rounds: usize,
    /// Percentage of objects kept rooted until the end of the next round.
    pub retain: u8,
    /// Time budget of one collector slice, 0 runs whole cycles.
    pub budget_us: u64,
    /// Collect before every allocation.
    pub aggressive: bool,
    /// Heap size in chunks below which the event loop never collects.
    pub min_chunks: usize,
    /// Workload seed.
    pub seed: u64,
    /// Print the report as JSON.
    pub json: bool,
    /// Enable verbose output.
    pub verbose: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            objects: 10_000,
            rounds: 10,
            retain: 10,
            budget_us: 1000,
            aggressive: false,
            min_chunks: 2,
            seed: 0,
            json: false,
            verbose: false,
        }
    }
}

/// Result of a simulated workload.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub objects_allocated: usize,
    pub rounds: usize,
    pub event_loop_iterations: usize,
    pub live_objects: usize,
    pub elapsed_ms: f64,
    pub statistics: MemoryStatistics,
}

impl RunReport {
    /// Human-readable summary lines.
    pub fn render(&self) -> String {
        let stats = &self.statistics;
        let pauses = &stats.step_pauses;
        let mut out = String::new();
        out.push_str(&format!(
            "allocated:        {} objects in {} rounds\n",
            self.objects_allocated, self.rounds
        ));
        out.push_str(&format!("live objects:     {}\n", self.live_objects));
        out.push_str(&format!("cycles:           {}\n", stats.cycles));
        out.push_str(&format!("freed objects:    {}\n", stats.freed_objects));
        out.push_str(&format!("max used memory:  {} bytes\n", stats.max_used_mem));
        out.push_str(&format!("max reserved:     {} bytes\n", stats.max_reserved_mem));
        out.push_str(&format!(
            "step pauses:      {} (p50 {}us, p99 {}us, max {}us)\n",
            pauses.count, pauses.p50_us, pauses.p99_us, pauses.max_us
        ));
        out.push_str(&format!("elapsed:          {:.2} ms\n", self.elapsed_ms));
        out
    }
}

/// Run command handler.
pub struct RunCommand {
    args: RunArgs,
}

impl RunCommand {
    /// Create a new RunCommand.
    pub fn new(args: RunArgs) -> Self {
        Self { args }
    }

    /// Validate argument combinations clap cannot express.
    fn validate(&self) -> Result<()> {
        if self.args.objects == 0 {
            return Err(SimError::Validation("--objects must be positive".to_string()));
        }
        if self.args.rounds == 0 {
            return Err(SimError::Validation("--rounds must be positive".to_string()));
        }
        Ok(())
    }

    fn config(&self) -> MmConfig {
        MmConfig {
            aggressive_gc: self.args.aggressive,
            gc_stats: true,
            gc_time_limit_us: self.args.budget_us,
            min_slots_gc_limit: self.args.min_chunks.max(1) * AVAILABLE_SLOTS,
            verbose: self.args.verbose,
            ..MmConfig::from_env()
        }
    }

    /// Execute the workload and collect the report.
    pub fn execute(&self) -> Result<RunReport> {
        self.validate()?;
        let start = Instant::now();
        let mut mm = MemoryManager::new(self.config())?;
        let mut rng = StdRng::seed_from_u64(self.args.seed);

        let mut previous: Vec<PersistentId> = Vec::new();
        let mut iterations = 0;

        for round in 0..self.args.rounds {
            let mut current = Vec::new();
            let mut group_head = None;

            // Host stack frame holding the group head and the newest node
            let head_slot = mm.stack_mut().push(None);
            let node_slot = mm.stack_mut().push(None);

            for i in 0..self.args.objects {
                let node = mm.alloc_managed(&NODE);
                mm.stack_mut().set(node_slot, Some(node));
                if i % GROUP_LEN == 0 {
                    group_head = Some(node);
                    mm.stack_mut().set(head_slot, group_head);
                } else {
                    mm.store_ref(node, 0, group_head)?;
                }

                // Primitive payload hanging off the node
                let blob = mm.alloc_managed(&BLOB);
                mm.store_ref(node, 1, Some(blob))?;

                if rng.gen_range(0..100u8) < self.args.retain {
                    current.push(mm.new_persistent(Some(node)));
                }

                mm.on_event_loop();
                iterations += 1;
            }

            mm.stack_mut().truncate(head_slot);
            for id in previous.drain(..) {
                mm.free_persistent(id)?;
            }
            previous = current;

            debug!(
                round,
                live = mm.heap().object_count(),
                cycles = mm.cycle_count(),
                "round finished"
            );
        }

        // Let the loop finish any slice in progress, then settle the heap
        while mm.is_collecting() {
            mm.on_event_loop();
            iterations += 1;
        }
        mm.run_gc();
        if self.args.verbose {
            mm.dump_stats();
        }

        let report = RunReport {
            objects_allocated: self.args.objects * self.args.rounds * 2,
            rounds: self.args.rounds,
            event_loop_iterations: iterations,
            live_objects: mm.heap().object_count(),
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            statistics: mm.statistics(),
        };
        info!(
            cycles = report.statistics.cycles,
            live = report.live_objects,
            "workload complete"
        );
        Ok(report)
    }

    /// Execute and print the report.
    pub fn run(&self) -> Result<()> {
        let report = self.execute()?;
        if self.args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print!("{}", report.render());
        }
        Ok(())
    }
}

/// Run the run command with the given arguments.
pub fn run_run(args: RunArgs) -> Result<()> {
    RunCommand::new(args).run()
}
