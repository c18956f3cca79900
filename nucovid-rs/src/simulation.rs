//! The event-driven engine.
//!
//! Individuals are never tracked one by one: an infection samples its whole
//! course up front as scheduled events, and dispatching an event only moves
//! one unit between two aggregate counters.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::contacts::ContactMatrix;
use crate::draws::{CONTACT_DRAWS, DrawCache, INFECTION_DRAWS};
use crate::error::{SimError, SimResult};
use crate::event::{Event, EventKind, EventQueue};
use crate::node::{Compartment, Node};
use crate::output::DailySummary;
use crate::sampler::PathSampler;

/// Simulated day -> generator seed applied when the run crosses into that day.
pub type SeedSchedule = BTreeMap<u32, u64>;

/// Field order is the checkpoint payload order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    nodes: Vec<Node>,
    contacts: ContactMatrix,
    queue: EventQueue,
    now: f64,
    /// Gap between the end of the last requested run and the last event it
    /// processed; carried into the next run so back-to-back runs line up.
    offset: f64,
    rng: ChaCha8Rng,
}

impl Simulation {
    pub fn new(nodes: Vec<Node>, contacts: ContactMatrix, seed: u64) -> SimResult<Simulation> {
        check_shape(&nodes, &contacts)?;
        for node in &nodes {
            node.disease().validate()?;
        }
        let mut sim = Simulation {
            nodes,
            contacts,
            queue: EventQueue::new(),
            now: 0.0,
            offset: 0.0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        };
        sim.reset();
        Ok(sim)
    }

    /// Back to time zero with every node fully susceptible and nothing pending.
    pub fn reset(&mut self) {
        self.now = 0.0;
        self.offset = 0.0;
        for node in &mut self.nodes {
            node.reset();
        }
        self.queue.clear();
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    /// Moves the clock, e.g. to start a fresh run part way into the calendar.
    pub fn set_now(&mut self, now: f64) {
        self.now = now;
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn contacts(&self) -> &ContactMatrix {
        &self.contacts
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn rng(&self) -> &ChaCha8Rng {
        &self.rng
    }

    /// Number of scheduled events not yet dispatched.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn next_event_time(&self) -> Option<f64> {
        self.queue.next_time()
    }

    /// Infects `k` susceptibles of `node` at the current time.
    pub fn seed_infections(&mut self, node: usize, k: u64) -> SimResult<()> {
        for _ in 0..k {
            let mut draws = DrawCache::fill(&mut self.rng, INFECTION_DRAWS);
            let target = self
                .nodes
                .get_mut(node)
                .ok_or(SimError::UnknownNode { node })?;
            if target.count(Compartment::Susceptible) == 0 {
                return Err(SimError::NoSusceptible { node });
            }
            target.take(Compartment::Susceptible, self.now)?;
            target.put(Compartment::Exposed);
            PathSampler {
                nodes: &self.nodes,
                contacts: &self.contacts,
                queue: &mut self.queue,
                rng: &mut draws,
            }
            .infect(node, self.now);
        }
        debug!(node, k, now = self.now, "seeded infections");
        Ok(())
    }

    /// Introduces one infectious individual straight into the asymptomatic
    /// compartment of `node`, skipping the exposed stage.
    pub fn import_asymptomatic(&mut self, node: usize) -> SimResult<()> {
        let mut draws = DrawCache::fill(&mut self.rng, INFECTION_DRAWS);
        let target = self
            .nodes
            .get_mut(node)
            .ok_or(SimError::UnknownNode { node })?;
        if target.count(Compartment::Susceptible) == 0 {
            return Err(SimError::NoSusceptible { node });
        }
        target.take(Compartment::Susceptible, self.now)?;
        target.put(Compartment::Asymptomatic);
        PathSampler {
            nodes: &self.nodes,
            contacts: &self.contacts,
            queue: &mut self.queue,
            rng: &mut draws,
        }
        .import_asymptomatic(node, self.now);
        Ok(())
    }

    pub fn run(&mut self, duration: f64, seeds: &SeedSchedule) -> SimResult<Vec<DailySummary>> {
        self.run_observed(duration, seeds, |_| {})
    }

    /// Processes events for `duration` days from the current time and
    /// returns one summary row per node for every day started, plus the
    /// state after the last event. `on_event` sees each event after it has
    /// been dispatched.
    pub fn run_observed(
        &mut self,
        duration: f64,
        seeds: &SeedSchedule,
        mut on_event: impl FnMut(&Event),
    ) -> SimResult<Vec<DailySummary>> {
        let start = self.now;
        let end = start + duration + self.offset;
        let mut day = start.ceil() as u32;
        let mut rows = Vec::new();
        let mut processed = 0u64;
        info!(start, duration, offset = self.offset, "running simulation");

        while let Some(next) = self.queue.next_time() {
            if next >= end {
                break;
            }
            while next > f64::from(day) {
                if let Some(&seed) = seeds.get(&day) {
                    debug!(day, seed, "reseeding generator");
                    self.reseed(seed);
                }
                self.summarize_into(day, &mut rows);
                day += 1;
            }
            if let Some(event) = self.step()? {
                on_event(&event);
                processed += 1;
            }
        }

        self.offset = end - self.now;
        self.summarize_into(day, &mut rows);
        info!(
            now = self.now,
            offset = self.offset,
            processed,
            pending = self.queue.len(),
            "run finished"
        );
        Ok(rows)
    }

    /// Pops and dispatches the earliest pending event.
    pub fn step(&mut self) -> SimResult<Option<Event>> {
        let Some(event) = self.queue.pop() else {
            return Ok(None);
        };
        self.now = event.time;
        self.dispatch(&event)?;
        Ok(Some(event))
    }

    fn dispatch(&mut self, event: &Event) -> SimResult<()> {
        trace!(
            time = event.time,
            kind = ?event.kind,
            source = event.source,
            target = event.target,
            "dispatch"
        );
        let Some((from, to)) = event.kind.transition() else {
            return self.resolve_contact(event);
        };
        self.node_mut(event.source)?.take(from, event.time)?;
        let target = self.node_mut(event.target)?;
        target.put(to);
        match event.kind {
            // Severe onsets are deliberately not counted here.
            EventKind::MildOnset => target.record_symptomatic(),
            EventKind::Hospitalized => target.record_admission(),
            _ => {}
        }
        Ok(())
    }

    /// A contact infects only if the randomly chosen member of the target
    /// population is currently susceptible.
    fn resolve_contact(&mut self, event: &Event) -> SimResult<()> {
        let mut draws = DrawCache::fill(&mut self.rng, CONTACT_DRAWS);
        let node = event.target;
        let target = self
            .nodes
            .get_mut(node)
            .ok_or(SimError::UnknownNode { node })?;
        if target.population == 0 {
            return Ok(());
        }
        let slot = draws.random_range(0..target.population);
        if slot >= target.count(Compartment::Susceptible) {
            return Ok(());
        }
        if event.source != event.target {
            target.record_introduction();
        }
        target.take(Compartment::Susceptible, event.time)?;
        target.put(Compartment::Exposed);
        PathSampler {
            nodes: &self.nodes,
            contacts: &self.contacts,
            queue: &mut self.queue,
            rng: &mut draws,
        }
        .infect(node, self.now);
        Ok(())
    }

    fn node_mut(&mut self, node: usize) -> SimResult<&mut Node> {
        self.nodes
            .get_mut(node)
            .ok_or(SimError::UnknownNode { node })
    }

    fn summarize_into(&self, day: u32, rows: &mut Vec<DailySummary>) {
        rows.extend(self.nodes.iter().map(|n| DailySummary::from_node(n, day)));
    }

    /// Consistency checks for state that did not come from [`Simulation::new`].
    pub(crate) fn check_integrity(&self) -> Result<(), String> {
        check_shape(&self.nodes, &self.contacts).map_err(|e| e.to_string())?;
        for node in &self.nodes {
            node.disease().validate().map_err(|e| e.to_string())?;
            if node.total() != node.population {
                return Err(format!(
                    "node {} counters sum to {} but population is {}",
                    node.id,
                    node.total(),
                    node.population
                ));
            }
        }
        if let Some(e) = self
            .queue
            .iter()
            .find(|e| e.source >= self.nodes.len() || e.target >= self.nodes.len())
        {
            return Err(format!(
                "pending event at t={} refers to node {} of {}",
                e.time,
                e.source.max(e.target),
                self.nodes.len()
            ));
        }
        Ok(())
    }
}

fn check_shape(nodes: &[Node], contacts: &ContactMatrix) -> SimResult<()> {
    let (rows, cols) = contacts.shape();
    if rows != nodes.len() || cols != nodes.len() {
        return Err(SimError::ContactMatrixShape {
            rows,
            cols,
            nodes: nodes.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::simple_disease;
    use crate::time_series::TimeSeries;

    fn single_node(population: u64, ki: f64, seed: u64) -> Simulation {
        let mut disease = simple_disease();
        disease.transmission = TimeSeries::constant(ki, 1);
        Simulation::new(
            vec![Node::new(0, population, disease)],
            ContactMatrix::isolated(1),
            seed,
        )
        .unwrap()
    }

    fn assert_conserved(sim: &Simulation) {
        for node in sim.nodes() {
            assert_eq!(node.total(), node.population, "node {}", node.id);
        }
    }

    #[test]
    fn test_matrix_shape_must_match_nodes() {
        let nodes = vec![
            Node::new(0, 10, simple_disease()),
            Node::new(1, 10, simple_disease()),
        ];
        let err = Simulation::new(nodes, ContactMatrix::isolated(3), 1).unwrap_err();
        assert!(matches!(
            err,
            SimError::ContactMatrixShape {
                rows: 3,
                cols: 3,
                nodes: 2
            }
        ));
    }

    #[test]
    fn test_time_never_goes_backwards() {
        let mut sim = single_node(5_000, 0.6, 17);
        sim.seed_infections(0, 5).unwrap();
        let mut last = sim.now();
        let mut count = 0;
        sim.run_observed(120.0, &SeedSchedule::new(), |e| {
            assert!(e.time >= last);
            last = e.time;
            count += 1;
        })
        .unwrap();
        assert!(count > 0);
        assert_conserved(&sim);
    }

    #[test]
    fn test_population_conserved_after_every_event() {
        let mut sim = single_node(2_000, 0.8, 3);
        sim.seed_infections(0, 3).unwrap();
        let mut steps = 0;
        while steps < 5_000 {
            match sim.step().unwrap() {
                Some(_) => assert_conserved(&sim),
                None => break,
            }
            steps += 1;
        }
    }

    #[test]
    fn test_transition_moves_exactly_one_unit() {
        let mut sim = single_node(1_000, 0.0, 8);
        sim.seed_infections(0, 1).unwrap();
        let mut before = *sim.nodes()[0].counts();
        while let Some(event) = sim.step().unwrap() {
            let after = *sim.nodes()[0].counts();
            let (from, to) = event.kind.transition().unwrap();
            for c in Compartment::ALL {
                let expected =
                    before[c as usize] as i64 - i64::from(c == from) + i64::from(c == to);
                assert_eq!(
                    after[c as usize] as i64,
                    expected,
                    "{c:?} after {:?}",
                    event.kind
                );
            }
            before = after;
        }
    }

    /// `(cumulative symptomatic, cumulative admissions, introduced)` per node.
    fn tallies(sim: &Simulation) -> Vec<(u64, u64, u64)> {
        sim.nodes()
            .iter()
            .map(|n| {
                (
                    n.cumulative_symptomatic(),
                    n.cumulative_admissions(),
                    n.introduced(),
                )
            })
            .collect()
    }

    #[test]
    fn test_tallies_move_only_on_their_events() {
        let mut disease = simple_disease();
        disease.transmission = TimeSeries::constant(0.6, 1);
        let nodes = vec![
            Node::new(0, 50_000, disease.clone()),
            Node::new(1, 50_000, disease),
        ];
        let contacts = ContactMatrix::from_rows(&[vec![0.5, 0.5], vec![0.5, 0.5]]).unwrap();
        let mut sim = Simulation::new(nodes, contacts, 13).unwrap();
        sim.seed_infections(0, 30).unwrap();

        let (mut mild, mut admitted, mut introduced) = (0, 0, 0);
        let mut before = tallies(&sim);
        let mut susceptible: Vec<u64> = sim
            .nodes()
            .iter()
            .map(|n| n.count(Compartment::Susceptible))
            .collect();
        for _ in 0..50_000 {
            let Some(event) = sim.step().unwrap() else {
                break;
            };
            let after = tallies(&sim);
            let mut expected = before.clone();
            let t = event.target;
            match event.kind {
                EventKind::MildOnset => {
                    expected[t].0 += 1;
                    mild += 1;
                }
                EventKind::Hospitalized => {
                    expected[t].1 += 1;
                    admitted += 1;
                }
                EventKind::Contact => {
                    let now_susceptible = sim.nodes()[t].count(Compartment::Susceptible);
                    let infected = now_susceptible + 1 == susceptible[t];
                    if infected && event.source != t {
                        expected[t].2 += 1;
                        introduced += 1;
                    }
                }
                _ => {}
            }
            assert_eq!(after, expected, "after {event:?}");
            before = after;
            susceptible = sim
                .nodes()
                .iter()
                .map(|n| n.count(Compartment::Susceptible))
                .collect();
        }
        assert!(mild > 0 && admitted > 0 && introduced > 0);
    }

    #[test]
    fn test_single_infection_without_transmission() {
        let mut sim = single_node(1_000, 0.0, 99);
        sim.seed_infections(0, 1).unwrap();
        sim.run(500.0, &SeedSchedule::new()).unwrap();

        let node = &sim.nodes()[0];
        assert_eq!(node.count(Compartment::Susceptible), 999);
        assert_eq!(
            node.count(Compartment::Resistant) + node.count(Compartment::Death),
            1
        );
        assert_eq!(node.introduced(), 0);
        assert!(sim.queue().is_empty());
    }

    #[test]
    fn test_cumulative_counters_follow_mild_and_admission() {
        let mut sim = single_node(100_000, 0.0, 5);
        sim.seed_infections(0, 2_000).unwrap();
        let (mut mild, mut admitted) = (0, 0);
        sim.run_observed(1_000.0, &SeedSchedule::new(), |e| match e.kind {
            EventKind::MildOnset => mild += 1,
            EventKind::Hospitalized => admitted += 1,
            _ => {}
        })
        .unwrap();
        let node = &sim.nodes()[0];
        assert_eq!(node.cumulative_symptomatic(), mild);
        assert_eq!(node.cumulative_admissions(), admitted);
        assert!(admitted > 0);
    }

    #[test]
    fn test_one_row_per_node_per_day() {
        let nodes = vec![
            Node::new(0, 1_000, simple_disease()),
            Node::new(1, 1_000, simple_disease()),
        ];
        let mut sim = Simulation::new(nodes, ContactMatrix::isolated(2), 4).unwrap();
        sim.seed_infections(0, 20).unwrap();
        sim.seed_infections(1, 20).unwrap();
        let rows = sim.run(30.0, &SeedSchedule::new()).unwrap();
        // Days 0..=29 while events are pending, plus the closing row.
        assert_eq!(rows.len() % 2, 0);
        for pair in rows.chunks(2) {
            assert_eq!(pair[0].day, pair[1].day);
            assert_eq!((pair[0].node, pair[1].node), (0, 1));
            assert_eq!(pair[0].total(), 1_000);
        }
        let days: Vec<u32> = rows.iter().step_by(2).map(|r| r.day).collect();
        assert!(days.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn test_run_stops_before_end_and_sets_offset() {
        let mut sim = single_node(10_000, 0.5, 21);
        sim.seed_infections(0, 50).unwrap();
        sim.run(10.0, &SeedSchedule::new()).unwrap();
        assert!(sim.now() < 10.0);
        assert!((sim.now() + sim.offset() - 10.0).abs() < 1e-9);
        if let Some(next) = sim.next_event_time() {
            assert!(next >= 10.0);
        }
    }

    #[test]
    fn test_back_to_back_runs_match_single_run() {
        let mut whole = single_node(20_000, 0.7, 1234);
        whole.seed_infections(0, 10).unwrap();
        let mut events_whole = Vec::new();
        whole
            .run_observed(60.0, &SeedSchedule::new(), |e| events_whole.push(*e))
            .unwrap();

        let mut split = single_node(20_000, 0.7, 1234);
        split.seed_infections(0, 10).unwrap();
        let mut events_split = Vec::new();
        split
            .run_observed(25.5, &SeedSchedule::new(), |e| events_split.push(*e))
            .unwrap();
        split
            .run_observed(34.5, &SeedSchedule::new(), |e| events_split.push(*e))
            .unwrap();

        assert_eq!(events_whole, events_split);
        assert_eq!(whole.nodes(), split.nodes());
    }

    #[test]
    fn test_reseed_schedule_changes_trajectory() {
        let run = |seeds: SeedSchedule| {
            let mut sim = single_node(20_000, 0.7, 1);
            sim.seed_infections(0, 10).unwrap();
            sim.run(40.0, &seeds).unwrap()
        };
        let plain = run(SeedSchedule::new());
        let same = run(SeedSchedule::new());
        let reseeded = run(SeedSchedule::from([(10, 777)]));
        assert_eq!(plain, same);
        assert_ne!(plain, reseeded);
    }

    #[test]
    fn test_contacts_route_by_matrix_row() {
        let nodes = vec![
            Node::new(0, 1_000_000, simple_disease()),
            Node::new(1, 1_000_000, simple_disease()),
        ];
        let contacts = ContactMatrix::from_rows(&[vec![0.9, 0.1], vec![0.1, 0.9]]).unwrap();
        let mut sim = Simulation::new(nodes, contacts, 2024).unwrap();
        sim.seed_infections(0, 500).unwrap();
        let (mut from_zero, mut to_one) = (0u32, 0u32);
        sim.run_observed(20.0, &SeedSchedule::new(), |e| {
            if e.kind == EventKind::Contact && e.source == 0 {
                from_zero += 1;
                if e.target == 1 {
                    to_one += 1;
                }
            }
        })
        .unwrap();
        assert!(from_zero > 500);
        let frac = f64::from(to_one) / f64::from(from_zero);
        assert!((frac - 0.1).abs() < 0.03, "fraction to node 1: {frac}");
    }

    #[test]
    fn test_cross_node_infection_counts_as_introduced() {
        let nodes = vec![
            Node::new(0, 10_000, simple_disease()),
            Node::new(1, 10_000, simple_disease()),
        ];
        // Everything node 0 emits lands in node 1.
        let contacts = ContactMatrix::from_rows(&[vec![0.0, 1.0], vec![0.0, 1.0]]).unwrap();
        let mut sim = Simulation::new(nodes, contacts, 31).unwrap();
        sim.seed_infections(0, 100).unwrap();
        sim.run(60.0, &SeedSchedule::new()).unwrap();
        assert_eq!(sim.nodes()[0].introduced(), 0);
        assert!(sim.nodes()[1].introduced() > 0);
        assert_conserved(&sim);
    }

    #[test]
    fn test_seeding_an_empty_node_fails() {
        let mut sim = single_node(2, 0.0, 1);
        sim.seed_infections(0, 2).unwrap();
        assert!(matches!(
            sim.seed_infections(0, 1),
            Err(SimError::NoSusceptible { node: 0 })
        ));
        assert!(matches!(
            sim.seed_infections(4, 1),
            Err(SimError::UnknownNode { node: 4 })
        ));
    }

    #[test]
    fn test_imported_case_resolves() {
        let mut sim = single_node(500, 0.0, 12);
        sim.import_asymptomatic(0).unwrap();
        assert_eq!(sim.nodes()[0].count(Compartment::Asymptomatic), 1);
        sim.run(1_000.0, &SeedSchedule::new()).unwrap();
        assert_eq!(sim.nodes()[0].count(Compartment::Resistant), 1);
    }
}
