use {
    crate::error::SacError,
    anyhow::Result,
    candle_core::{
        Device,
        Tensor,
    },
    rand::{
        distributions::{
            Uniform,
            WeightedIndex,
        },
        rngs::StdRng,
        Rng,
        SeedableRng,
    },
    std::collections::VecDeque,
    strum::Display,
    tracing::{
        info,
        warn,
    },
    unzip_n::unzip_n,
};

unzip_n!(5);

/// A transition in the replay buffer.
///
/// Transitions are stored host-side and are never mutated after insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: Vec<f32>,
    pub action: Vec<f32>,
    pub reward: f32,
    pub next_state: Vec<f32>,
    pub done: bool,
}
impl Transition {
    pub fn new(
        state: Vec<f32>,
        action: Vec<f32>,
        reward: f32,
        next_state: Vec<f32>,
        done: bool,
    ) -> Self {
        Self {
            state,
            action,
            reward,
            next_state,
            done,
        }
    }

    /// Split one batched environment step into per-instance transitions.
    ///
    /// `states`, `actions` and `next_states` are `(N, _)`, `rewards` is `(N,)`
    /// and `dones` is a `(N,)` tensor of `u8` flags.
    pub fn from_batch(
        states: &Tensor,
        actions: &Tensor,
        rewards: &Tensor,
        next_states: &Tensor,
        dones: &Tensor,
    ) -> Result<Vec<Self>> {
        let states = states.to_vec2::<f32>()?;
        let actions = actions.to_vec2::<f32>()?;
        let rewards = rewards.to_vec1::<f32>()?;
        let next_states = next_states.to_vec2::<f32>()?;
        let dones = dones.to_vec1::<u8>()?;

        let n = states.len();
        for (what, len) in [
            ("actions", actions.len()),
            ("rewards", rewards.len()),
            ("next_states", next_states.len()),
            ("dones", dones.len()),
        ] {
            if len != n {
                Err(SacError::shape(format!("{what} batch"), &[n], &[len]))?
            }
        }

        Ok(states
            .into_iter()
            .zip(actions)
            .zip(rewards)
            .zip(next_states)
            .zip(dones)
            .map(|((((s, a), r), ns), d)| Self::new(s, a, r, ns, d != 0))
            .collect())
    }
}

/// The two regions of the replay buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Segment {
    #[strum(serialize = "demonstration")]
    Demonstration,
    #[strum(serialize = "online")]
    Online,
}

/// A sampled batch as five parallel tensors.
///
/// # Fields
///
/// * `segment` - The segment every transition was drawn from.
/// * `states` - `(B, state_dim)`
/// * `actions` - `(B, action_dim)`
/// * `rewards` - `(B, 1)`
/// * `next_states` - `(B, state_dim)`
/// * `dones` - `(B, 1)`, `1.0` for terminal transitions.
#[derive(Debug, Clone)]
pub struct TransitionBatch {
    pub segment: Segment,
    pub states: Tensor,
    pub actions: Tensor,
    pub rewards: Tensor,
    pub next_states: Tensor,
    pub dones: Tensor,
}
impl TransitionBatch {
    pub fn len(&self) -> usize {
        self.states.dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A replay buffer split into a demonstration segment and an online segment.
///
/// The demonstration segment is filled first and is hard-capped. The first
/// call to [`ReplayBuffer::push`] switches the buffer to the online segment
/// for good: from then on `len`, `sample` and insertion only see online data,
/// and the demonstration segment stays in memory as read-only history.
///
/// The online segment is a simple ring buffer / VecDeque that evicts its
/// oldest transition once full.
///
/// # Fields
///
/// * `demonstrations` - The demonstration transitions.
/// * `weights` - One sampling weight per demonstration transition.
/// * `online` - The ring buffer of self-collected transitions.
/// * `active` - The segment that `len`, `sample` and insertion target.
#[derive(Clone)]
pub struct ReplayBuffer {
    demonstrations: Vec<Transition>,
    weights: Vec<f32>,
    weighted_index: Option<WeightedIndex<f32>>,
    demonstration_capacity: usize,
    online: VecDeque<Transition>,
    capacity: usize,
    active: Segment,
    size_state: usize,
    size_action: usize,
    rng: StdRng,
}
impl ReplayBuffer {
    /// Create an empty buffer in its demonstration phase.
    pub fn new(
        demonstration_capacity: usize,
        capacity: usize,
        size_state: usize,
        size_action: usize,
        seed: u64,
    ) -> Self {
        Self {
            demonstrations: Vec::with_capacity(demonstration_capacity),
            weights: Vec::with_capacity(demonstration_capacity),
            weighted_index: None,
            demonstration_capacity,
            online: VecDeque::with_capacity(capacity),
            capacity,
            active: Segment::Demonstration,
            size_state,
            size_action,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// The number of transitions in the active segment.
    pub fn len(&self) -> usize {
        match self.active {
            Segment::Demonstration => self.demonstrations.len(),
            Segment::Online => self.online.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_segment(&self) -> Segment {
        self.active
    }

    pub fn demonstration_len(&self) -> usize {
        self.demonstrations.len()
    }

    pub fn online_len(&self) -> usize {
        self.online.len()
    }

    pub fn demonstration_capacity(&self) -> usize {
        self.demonstration_capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if the demonstration segment has reached its capacity.
    pub fn is_demonstration_full(&self) -> bool {
        self.demonstrations.len() >= self.demonstration_capacity
    }

    /// Check if the online segment is full.
    pub fn is_full(&self) -> bool {
        self.online.len() == self.capacity
    }

    fn check_dims(
        &self,
        transition: &Transition,
    ) -> Result<(), SacError> {
        let state = [self.size_state];
        if transition.state.len() != self.size_state {
            return Err(SacError::shape("transition state", &state, &[transition.state.len()]));
        }
        if transition.next_state.len() != self.size_state {
            return Err(SacError::shape("transition next_state", &state, &[transition.next_state.len()]));
        }
        if transition.action.len() != self.size_action {
            return Err(SacError::shape(
                "transition action",
                &[self.size_action],
                &[transition.action.len()],
            ));
        }
        Ok(())
    }

    /// Push demonstration transitions, each stored with the given sampling
    /// weight.
    ///
    /// The segment is a hard cap: transitions beyond the remaining capacity are
    /// discarded and the number actually stored is returned. Pushing into a
    /// full segment, or after the buffer went online, is an error.
    pub fn push_demonstration(
        &mut self,
        transitions: Vec<Transition>,
        weight: f32,
    ) -> Result<usize> {
        if self.active == Segment::Online {
            Err(SacError::DemonstrationSegmentClosed)?
        }
        if self.is_demonstration_full() {
            Err(SacError::DemonstrationSegmentFull {
                capacity: self.demonstration_capacity,
            })?
        }
        if !(weight > 0.0 && weight.is_finite()) {
            Err(SacError::InvalidConfig(format!("demonstration weight must be positive, got {weight}")))?
        }
        for transition in &transitions {
            self.check_dims(transition)?;
        }

        let remaining = self.demonstration_capacity - self.demonstrations.len();
        let offered = transitions.len();
        let accepted = offered.min(remaining);
        if accepted < offered {
            info!("demonstration segment full, discarding {} transitions", offered - accepted);
        }

        self.demonstrations.extend(transitions.into_iter().take(accepted));
        self.weights.extend(std::iter::repeat(weight).take(accepted));
        self.weighted_index = None;
        Ok(accepted)
    }

    /// Push online transitions into the buffer.
    ///
    /// If the buffer is full, the oldest transition is removed to make room for
    /// the new transition. The first push switches the buffer to its online
    /// segment permanently.
    pub fn push(
        &mut self,
        transitions: Vec<Transition>,
    ) -> Result<()> {
        for transition in &transitions {
            self.check_dims(transition)?;
        }
        if self.active == Segment::Demonstration {
            warn!(
                "replay buffer switching to the online segment with {} demonstration transitions kept read-only",
                self.demonstrations.len(),
            );
            self.active = Segment::Online;
            self.weighted_index = None;
        }
        for transition in transitions {
            if self.online.len() == self.capacity {
                self.online.pop_front();
            }
            self.online.push_back(transition);
        }
        Ok(())
    }

    /// Sample a random batch (with replacement) from the active segment.
    ///
    /// Demonstration indices are drawn proportionally to their stored
    /// weights, online indices uniformly. Asking for more transitions than the
    /// active segment holds is an error; a short batch is never returned.
    pub fn sample(
        &mut self,
        batch_size: usize,
        device: &Device,
    ) -> Result<TransitionBatch> {
        if batch_size == 0 {
            Err(SacError::InvalidConfig("batch_size must be positive".to_owned()))?
        }
        let available = self.len();
        if available < batch_size {
            Err(SacError::InsufficientTransitions {
                segment: match self.active {
                    Segment::Demonstration => "demonstration",
                    Segment::Online => "online",
                },
                requested: batch_size,
                available,
            })?
        }

        let indices: Vec<usize> = match self.active {
            Segment::Demonstration => {
                let weighted = match self.weighted_index.take() {
                    Some(weighted) => weighted,
                    None => WeightedIndex::new(&self.weights)?,
                };
                let indices = (0..batch_size)
                    .map(|_| self.rng.sample(&weighted))
                    .collect();
                self.weighted_index = Some(weighted);
                indices
            }
            Segment::Online => (&mut self.rng)
                .sample_iter(Uniform::from(0..available))
                .take(batch_size)
                .collect(),
        };

        let (states, actions, rewards, next_states, dones) = indices
            .into_iter()
            .map(|i| match self.active {
                Segment::Demonstration => &self.demonstrations[i],
                Segment::Online => &self.online[i],
            })
            .map(|t| {
                (
                    t.state.as_slice(),
                    t.action.as_slice(),
                    t.reward,
                    t.next_state.as_slice(),
                    if t.done { 1.0f32 } else { 0.0 },
                )
            })
            .unzip_n_vec();

        Ok(TransitionBatch {
            segment: self.active,
            states: Tensor::from_vec(states.concat(), (batch_size, self.size_state), device)?,
            actions: Tensor::from_vec(actions.concat(), (batch_size, self.size_action), device)?,
            rewards: Tensor::from_vec(rewards, (batch_size, 1), device)?,
            next_states: Tensor::from_vec(next_states.concat(), (batch_size, self.size_state), device)?,
            dones: Tensor::from_vec(dones, (batch_size, 1), device)?,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn transition(tag: f32) -> Transition {
        Transition::new(vec![tag, tag], vec![tag], tag, vec![tag + 1.0, tag + 1.0], false)
    }

    fn rewards(batch: &TransitionBatch) -> Vec<f32> {
        batch.rewards.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    #[test]
    fn warmup_samples_only_demonstrations() {
        let mut buffer = ReplayBuffer::new(8, 16, 2, 1, 0);
        let accepted = buffer
            .push_demonstration((0..5).map(|_| transition(1.0)).collect(), 50.0)
            .unwrap();
        assert_eq!(accepted, 5);
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.active_segment(), Segment::Demonstration);

        for _ in 0..20 {
            let batch = buffer.sample(4, &Device::Cpu).unwrap();
            assert_eq!(batch.segment, Segment::Demonstration);
            assert!(rewards(&batch).iter().all(|&r| r == 1.0));
        }
    }

    #[test]
    fn demonstration_segment_is_a_hard_cap() {
        let mut buffer = ReplayBuffer::new(3, 16, 2, 1, 0);
        let accepted = buffer
            .push_demonstration((0..5).map(|i| transition(i as f32)).collect(), 1.0)
            .unwrap();
        assert_eq!(accepted, 3);
        assert!(buffer.is_demonstration_full());

        let err = buffer.push_demonstration(vec![transition(9.0)], 1.0).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SacError>(),
            Some(&SacError::DemonstrationSegmentFull { capacity: 3 }),
        );
    }

    #[test]
    fn online_push_closes_the_demonstration_segment() {
        let mut buffer = ReplayBuffer::new(4, 16, 2, 1, 0);
        buffer.push_demonstration(vec![transition(1.0); 2], 1.0).unwrap();
        buffer.push(vec![transition(-1.0); 3]).unwrap();

        assert_eq!(buffer.active_segment(), Segment::Online);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.demonstration_len(), 2);

        let err = buffer.push_demonstration(vec![transition(1.0)], 1.0).unwrap_err();
        assert_eq!(err.downcast_ref::<SacError>(), Some(&SacError::DemonstrationSegmentClosed));

        for _ in 0..20 {
            let batch = buffer.sample(3, &Device::Cpu).unwrap();
            assert_eq!(batch.segment, Segment::Online);
            assert!(rewards(&batch).iter().all(|&r| r == -1.0));
        }
    }

    #[test]
    fn online_segment_evicts_oldest_first() {
        let capacity = 4;
        let mut buffer = ReplayBuffer::new(0, capacity, 2, 1, 0);
        buffer
            .push((0..=capacity).map(|i| transition(i as f32)).collect())
            .unwrap();

        assert_eq!(buffer.len(), capacity);
        assert!(buffer.is_full());

        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..200 {
            let batch = buffer.sample(capacity, &Device::Cpu).unwrap();
            seen.extend(rewards(&batch).into_iter().map(|r| r as i64));
        }
        assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn underfilled_segment_refuses_to_sample() {
        let mut buffer = ReplayBuffer::new(8, 16, 2, 1, 0);
        buffer.push_demonstration(vec![transition(1.0); 3], 1.0).unwrap();

        let err = buffer.sample(4, &Device::Cpu).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SacError>(),
            Some(&SacError::InsufficientTransitions {
                segment: "demonstration",
                requested: 4,
                available: 3,
            }),
        );
    }

    #[test]
    fn demonstration_sampling_follows_weights() {
        let mut buffer = ReplayBuffer::new(2, 16, 2, 1, 7);
        buffer.push_demonstration(vec![transition(0.0)], 1.0).unwrap();
        buffer.push_demonstration(vec![transition(1.0)], 9.0).unwrap();

        let batch = buffer.sample(2_000, &Device::Cpu).unwrap();
        let heavy = rewards(&batch).iter().filter(|&&r| r == 1.0).count();
        assert!(heavy > 1_600, "heavy entry drawn {heavy} times out of 2000");
    }

    #[test]
    fn batches_are_shaped_for_tensor_math() {
        let mut buffer = ReplayBuffer::new(0, 16, 2, 1, 0);
        buffer
            .push(vec![Transition::new(vec![0.5, 0.5], vec![0.1], 2.0, vec![0.6, 0.6], true)])
            .unwrap();
        let batch = buffer.sample(3, &Device::Cpu).unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.states.dims(), &[3, 2]);
        assert_eq!(batch.actions.dims(), &[3, 1]);
        assert_eq!(batch.rewards.dims(), &[3, 1]);
        assert_eq!(batch.next_states.dims(), &[3, 2]);
        assert_eq!(batch.dones.to_vec2::<f32>().unwrap(), vec![vec![1.0]; 3]);
    }

    #[test]
    fn wrong_dimensions_are_rejected() {
        let mut buffer = ReplayBuffer::new(4, 16, 2, 1, 0);
        let bad = Transition::new(vec![0.0; 3], vec![0.0], 0.0, vec![0.0; 2], false);
        let err = buffer.push(vec![bad]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SacError>(),
            Some(SacError::ShapeMismatch { .. }),
        ));
        assert_eq!(buffer.active_segment(), Segment::Demonstration);
    }

    #[test]
    fn transitions_split_from_an_environment_batch() {
        let device = Device::Cpu;
        let states = Tensor::new(&[[0f32, 1.0], [2.0, 3.0]], &device).unwrap();
        let actions = Tensor::new(&[[0.1f32], [0.2]], &device).unwrap();
        let rewards = Tensor::new(&[1f32, 0.0], &device).unwrap();
        let next_states = Tensor::new(&[[4f32, 5.0], [6.0, 7.0]], &device).unwrap();
        let dones = Tensor::new(&[0u8, 1], &device).unwrap();

        let transitions =
            Transition::from_batch(&states, &actions, &rewards, &next_states, &dones).unwrap();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[1], Transition::new(vec![2.0, 3.0], vec![0.2], 0.0, vec![6.0, 7.0], true));
    }
}
