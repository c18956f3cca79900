//! Samples the whole disease course of one newly infected individual.
//!
//! Every branch point is a duel between exponential sojourn times; the
//! earlier draw decides the branch. All transitions of the course, and all
//! of the contacts the individual makes while infectious, are scheduled up
//! front.

use rand::{Rng, RngCore};
use rand_distr::{Distribution, Exp};

use crate::contacts::ContactMatrix;
use crate::event::{EventKind, EventQueue};
use crate::node::{DelayPath, DetectionPath, Node, RecoveryPath};

/// Day index used for table lookups at simulated time `t`.
pub(crate) fn day_of(t: f64) -> usize {
    t as usize
}

/// Rate of the remaining sojourn once a mean delay of `delay` days has been
/// spent before detection: `1 / (1/rate - delay)`.
pub(crate) fn delay_adjusted(rate: f64, delay: f64) -> f64 {
    1.0 / (1.0 / rate - delay)
}

pub(crate) struct PathSampler<'a, R: RngCore> {
    pub nodes: &'a [Node],
    pub contacts: &'a ContactMatrix,
    pub queue: &'a mut EventQueue,
    pub rng: &'a mut R,
}

/// Infectiousness is piecewise constant: `(start, multiplier)` phases in
/// time order.
struct Course {
    node: usize,
    detected: bool,
    phases: Vec<(f64, f64)>,
}

impl Course {
    /// Opens a phase at `start`; detected individuals use the detected
    /// multiplier instead of `undetected`.
    fn enter_phase(&mut self, node: &Node, start: f64, undetected: f64) {
        let multiplier = if self.detected {
            node.infectiousness_detected()
        } else {
            undetected
        };
        self.phases.push((start, multiplier));
    }
}

impl<R: RngCore> PathSampler<'_, R> {
    /// Schedules the course of one individual who has just moved from S to E
    /// in node `n` at time `now`.
    pub fn infect(&mut self, n: usize, now: f64) {
        let nodes = self.nodes;
        let node = &nodes[n];
        let rates = *node.rates();
        let t_pres = now + self.sojourn(rates.presymptomatic);
        let t_asym = now + self.sojourn(rates.asymptomatic);

        let mut course = Course {
            node: n,
            detected: false,
            phases: Vec::with_capacity(5),
        };
        let (onset, resolved) = if t_pres < t_asym {
            (t_pres, self.symptomatic(node, &mut course, t_pres))
        } else {
            (t_asym, self.asymptomatic(node, &mut course, t_asym))
        };
        self.contact_stream(node, &course, onset, resolved);
    }

    /// Schedules the course of someone introduced straight into the
    /// asymptomatic compartment at `now`: recovery and contacts only.
    pub fn import_asymptomatic(&mut self, n: usize, now: f64) {
        let nodes = self.nodes;
        let node = &nodes[n];
        let mut course = Course {
            node: n,
            detected: false,
            phases: Vec::with_capacity(1),
        };
        self.detect(&mut course, node.p_detect(day_of(now), DetectionPath::Asymptomatic));
        let multiplier = if course.detected {
            node.infectiousness_detected() * node.infectiousness_asymptomatic()
        } else {
            node.infectiousness_asymptomatic()
        };
        course.phases.push((now, multiplier));

        let t_rec = now + self.sojourn(node.recovery_rate(day_of(now), RecoveryPath::Asymptomatic));
        self.schedule(&course, t_rec, EventKind::RecoverAsymptomatic);
        self.contact_stream(node, &course, now, t_rec);
    }

    /// E -> P, then mild or severe. Returns the time the course resolves.
    fn symptomatic(&mut self, node: &Node, course: &mut Course, t_pres: f64) -> f64 {
        let rates = *node.rates();
        self.detect(course, node.p_detect(day_of(t_pres), DetectionPath::Presymptomatic));
        self.schedule(course, t_pres, EventKind::Presymptomatic);
        course.enter_phase(node, t_pres, 1.0);

        let t_mild = t_pres + self.sojourn(rates.mild);
        let t_severe = t_pres + self.sojourn(rates.severe);

        if t_mild < t_severe {
            self.schedule(course, t_mild, EventKind::MildOnset);
            course.enter_phase(node, t_mild, 1.0);

            let delay = node.detection_delay(DelayPath::Mild);
            let t_det = t_mild + self.sojourn(1.0 / delay);
            self.detect(course, node.p_detect(day_of(t_mild), DetectionPath::Mild));
            course.enter_phase(node, t_det, 1.0);

            let rate = node.recovery_rate(day_of(t_pres), RecoveryPath::Mild);
            let t_rec = t_det + self.sojourn(delay_adjusted(rate, delay));
            self.schedule(course, t_rec, EventKind::RecoverMild);
            t_rec
        } else {
            self.schedule(course, t_severe, EventKind::SevereOnset);
            course.enter_phase(node, t_severe, 1.0);

            let delay = node.detection_delay(DelayPath::Severe);
            let t_det = t_severe + self.sojourn(1.0 / delay);
            self.detect(course, node.p_detect(day_of(t_severe), DetectionPath::Severe));
            course.enter_phase(node, t_det, 1.0);

            let t_hosp = t_det + self.sojourn(delay_adjusted(rates.hospitalization, delay));
            self.schedule(course, t_hosp, EventKind::Hospitalized);
            course.enter_phase(node, t_hosp, 1.0);

            self.hospital_stay(node, course, t_hosp)
        }
    }

    /// Hospital -> recovery, or -> critical -> (post-critical -> recovery | death).
    fn hospital_stay(&mut self, node: &Node, course: &Course, t_hosp: f64) -> f64 {
        let rates = *node.rates();
        if self.rng.random::<f64>() > node.p_critical(day_of(t_hosp)) {
            let rate = node.recovery_rate(day_of(t_hosp), RecoveryPath::Hospital);
            let t_rec = t_hosp + self.sojourn(rate);
            self.schedule(course, t_rec, EventKind::RecoverHospital);
            return t_rec;
        }

        let t_crit = t_hosp + self.sojourn(rates.critical);
        self.schedule(course, t_crit, EventKind::Critical);

        if self.rng.random::<f64>() > node.p_death(day_of(t_crit)) {
            let rate = node.recovery_rate(day_of(t_crit), RecoveryPath::Critical);
            let t_post = t_crit + self.sojourn(rate);
            self.schedule(course, t_post, EventKind::PostCritical);

            let rate = node.recovery_rate(day_of(t_post), RecoveryPath::PostCritical);
            let t_rec = t_post + self.sojourn(rate);
            self.schedule(course, t_rec, EventKind::RecoverCritical);
            t_rec
        } else {
            let t_death = t_crit + self.sojourn(rates.death);
            self.schedule(course, t_death, EventKind::Death);
            t_death
        }
    }

    /// E -> A, then recovery. Returns the time the course resolves.
    fn asymptomatic(&mut self, node: &Node, course: &mut Course, t_asym: f64) -> f64 {
        let reduced = node.infectiousness_asymptomatic();
        self.schedule(course, t_asym, EventKind::Asymptomatic);
        course.phases.push((t_asym, reduced));

        let delay = node.detection_delay(DelayPath::Asymptomatic);
        let t_det = t_asym + self.sojourn(1.0 / delay);
        self.detect(course, node.p_detect(day_of(t_asym), DetectionPath::Asymptomatic));
        course.enter_phase(node, t_det, reduced);

        let rate = node.recovery_rate(day_of(t_asym), RecoveryPath::Asymptomatic);
        let t_rec = t_det + self.sojourn(delay_adjusted(rate, delay));
        self.schedule(course, t_rec, EventKind::RecoverAsymptomatic);
        t_rec
    }

    /// Contacts from `onset` until `resolved`, with a hazard of
    /// `Ki(day) * multiplier` where the multiplier follows the course phases.
    /// A course that never resolves makes no contacts at all.
    fn contact_stream(&mut self, node: &Node, course: &Course, onset: f64, resolved: f64) {
        if !resolved.is_finite() {
            return;
        }
        let phases = &course.phases;
        let mut bin = 0;
        let mut tc = onset + self.sojourn(node.ki(day_of(onset)) * phases[bin].1);
        while tc < resolved {
            if let Some(target) = self.contacts.choose_target(course.node, &mut *self.rng) {
                self.queue
                    .schedule(tc, EventKind::Contact, course.node, target, course.detected);
            }
            while bin + 1 < phases.len() && phases[bin + 1].0 < tc {
                bin += 1;
            }
            tc += self.sojourn(node.ki(day_of(tc)) * phases[bin].1);
        }
    }

    /// Detection is sticky: once detected, no further coin is drawn.
    fn detect(&mut self, course: &mut Course, p: f64) {
        if !course.detected {
            course.detected = self.rng.random::<f64>() < p;
        }
    }

    fn schedule(&mut self, course: &Course, time: f64, kind: EventKind) {
        self.queue
            .schedule(time, kind, course.node, course.node, course.detected);
    }

    /// Exponential waiting time with the given hazard. A hazard that is zero
    /// or not a number means the transition never happens.
    fn sojourn(&mut self, rate: f64) -> f64 {
        if rate.is_nan() || rate <= 0.0 {
            return f64::INFINITY;
        }
        match Exp::new(rate) {
            Ok(exp) => exp.sample(&mut *self.rng),
            Err(_) => f64::INFINITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::node::tests::simple_disease;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample(nodes: &[Node], contacts: &ContactMatrix, seed: u64) -> Vec<Event> {
        let mut queue = EventQueue::new();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        PathSampler {
            nodes,
            contacts,
            queue: &mut queue,
            rng: &mut rng,
        }
        .infect(0, 0.0);
        queue.to_sorted_vec()
    }

    fn transitions(events: &[Event]) -> Vec<EventKind> {
        events
            .iter()
            .map(|e| e.kind)
            .filter(|k| *k != EventKind::Contact)
            .collect()
    }

    #[test]
    fn test_delay_adjusted_rate() {
        // Mean 9 days, 2 of which are spent before detection.
        let adjusted = delay_adjusted(1.0 / 9.0, 2.0);
        assert!((1.0 / adjusted - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_every_course_is_a_valid_chain() {
        let nodes = vec![Node::new(0, 1000, simple_disease())];
        let contacts = ContactMatrix::isolated(1);
        use EventKind as K;
        let valid = [
            vec![K::Asymptomatic, K::RecoverAsymptomatic],
            vec![K::Presymptomatic, K::MildOnset, K::RecoverMild],
            vec![K::Presymptomatic, K::SevereOnset, K::Hospitalized, K::RecoverHospital],
            vec![
                K::Presymptomatic,
                K::SevereOnset,
                K::Hospitalized,
                K::Critical,
                K::PostCritical,
                K::RecoverCritical,
            ],
            vec![K::Presymptomatic, K::SevereOnset, K::Hospitalized, K::Critical, K::Death],
        ];
        for seed in 0..500 {
            let events = sample(&nodes, &contacts, seed);
            let chain = transitions(&events);
            assert!(valid.contains(&chain), "seed {seed}: {chain:?}");
        }
    }

    #[test]
    fn test_contacts_fall_inside_infectious_window() {
        let mut disease = simple_disease();
        disease.transmission = crate::time_series::TimeSeries::constant(3.0, 1);
        let nodes = vec![Node::new(0, 1000, disease)];
        let contacts = ContactMatrix::isolated(1);
        let mut saw_contact = false;
        for seed in 0..100 {
            let events = sample(&nodes, &contacts, seed);
            let onset = events
                .iter()
                .find(|e| matches!(e.kind, EventKind::Presymptomatic | EventKind::Asymptomatic))
                .unwrap()
                .time;
            let resolved = events
                .iter()
                .filter(|e| e.kind != EventKind::Contact)
                .map(|e| e.time)
                .fold(f64::MIN, f64::max);
            for contact in events.iter().filter(|e| e.kind == EventKind::Contact) {
                saw_contact = true;
                assert!(contact.time > onset && contact.time < resolved);
            }
        }
        assert!(saw_contact);
    }

    #[test]
    fn test_zero_transmission_makes_no_contacts() {
        let mut disease = simple_disease();
        disease.transmission = crate::time_series::TimeSeries::constant(0.0, 1);
        let nodes = vec![Node::new(0, 1000, disease)];
        let contacts = ContactMatrix::isolated(1);
        for seed in 0..50 {
            let events = sample(&nodes, &contacts, seed);
            assert!(events.iter().all(|e| e.kind != EventKind::Contact));
        }
    }

    #[test]
    fn test_detection_is_monotone_along_course() {
        let mut disease = simple_disease();
        disease.detection = vec![[0.5, 0.5, 0.5, 0.5]];
        let nodes = vec![Node::new(0, 1000, disease)];
        let contacts = ContactMatrix::isolated(1);
        for seed in 0..200 {
            let mut events = sample(&nodes, &contacts, seed);
            events.retain(|e| e.kind != EventKind::Contact);
            events.sort_by_key(|e| e.seq);
            let flags: Vec<bool> = events.iter().map(|e| e.detected).collect();
            assert!(flags.windows(2).all(|w| w[0] <= w[1]), "seed {seed}: {flags:?}");
        }
    }

    #[test]
    fn test_certain_detection_marks_every_event() {
        let mut disease = simple_disease();
        disease.detection = vec![[1.0, 1.0, 1.0, 1.0]];
        let nodes = vec![Node::new(0, 1000, disease)];
        let contacts = ContactMatrix::isolated(1);
        for seed in 0..50 {
            let events = sample(&nodes, &contacts, seed);
            // The asymptomatic onset is scheduled before its detection coin.
            assert!(
                events
                    .iter()
                    .filter(|e| e.kind != EventKind::Asymptomatic)
                    .all(|e| e.detected)
            );
        }
    }

    #[test]
    fn test_import_schedules_recovery_and_contacts_only() {
        let mut disease = simple_disease();
        disease.transmission = crate::time_series::TimeSeries::constant(2.0, 1);
        let nodes = vec![Node::new(0, 1000, disease)];
        let contacts = ContactMatrix::isolated(1);
        let mut queue = EventQueue::new();
        let mut rng = ChaCha8Rng::seed_from_u64(77);
        PathSampler {
            nodes: &nodes,
            contacts: &contacts,
            queue: &mut queue,
            rng: &mut rng,
        }
        .import_asymptomatic(0, 5.0);
        let events = queue.to_sorted_vec();
        assert_eq!(transitions(&events), vec![EventKind::RecoverAsymptomatic]);
        assert!(events.iter().all(|e| e.time >= 5.0));
    }

    #[test]
    fn test_unending_course_makes_no_contacts() {
        let mut disease = simple_disease();
        disease.transmission = crate::time_series::TimeSeries::constant(2.0, 1);
        disease.rates.asymptomatic = 0.0;
        disease.rates.severe = 1e6;
        disease.p_critical = crate::time_series::TimeSeries::constant(0.0, 1);
        for row in &mut disease.recovery {
            row[RecoveryPath::Hospital as usize] = 0.0;
        }
        let nodes = vec![Node::new(0, 1000, disease)];
        let contacts = ContactMatrix::isolated(1);
        for seed in 0..20 {
            let events = sample(&nodes, &contacts, seed);
            assert!(events.iter().all(|e| e.kind != EventKind::Contact));
            assert!(events.iter().any(|e| e.kind == EventKind::RecoverHospital));
        }
    }

    #[test]
    fn test_same_seed_same_course() {
        let nodes = vec![Node::new(0, 1000, simple_disease())];
        let contacts = ContactMatrix::isolated(1);
        assert_eq!(sample(&nodes, &contacts, 42), sample(&nodes, &contacts, 42));
    }
}
