/// Component polled from the host's driving loop (hardware bridges, timers).
pub trait LoopMember: Send {
    /// Does whatever work is available without blocking; returns how much.
    fn poll(&mut self) -> usize;
    fn name(&self) -> &str;
}

/// Handle returned by [`LoopRuntime::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(u64);

impl MemberId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Ordered set of loop members polled once per tick.
pub struct LoopRuntime {
    members: Vec<(MemberId, Box<dyn LoopMember>)>,
    next_id: u64,
}

impl Default for LoopRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopRuntime {
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
            next_id: 1,
        }
    }

    pub fn register<M>(&mut self, member: M) -> MemberId
    where
        M: LoopMember + 'static,
    {
        self.register_boxed(Box::new(member))
    }

    pub fn register_boxed(&mut self, member: Box<dyn LoopMember>) -> MemberId {
        let id = MemberId(self.next_id);
        self.next_id += 1;
        tracing::debug!(member = member.name(), id = id.0, "loop member registered");
        self.members.push((id, member));
        id
    }

    /// Detaches a member, handing it back to the caller.
    pub fn remove(&mut self, id: MemberId) -> Option<Box<dyn LoopMember>> {
        let index = self.members.iter().position(|(mid, _)| *mid == id)?;
        let (_, member) = self.members.remove(index);
        tracing::debug!(member = member.name(), id = id.0, "loop member removed");
        Some(member)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Ids of the registered members in poll order.
    pub fn ids(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.members.iter().map(|(id, _)| *id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn run_tick(&mut self) -> usize {
        self.run_tick_with(|_| {})
    }

    /// Polls every member once, calling `before` ahead of each poll.
    pub fn run_tick_with(&mut self, mut before: impl FnMut(&str)) -> usize {
        let mut work = 0;
        for (_, member) in self.members.iter_mut() {
            before(member.name());
            work += member.poll();
        }
        work
    }
}
