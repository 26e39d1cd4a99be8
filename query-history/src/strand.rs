use tokio::sync::mpsc;

/// Serialized execution domain for one pipeline instance.
///
/// Provider callbacks may fire on any worker thread; wrapping them through a
/// strand turns each completion into an event on a single-consumer queue.
/// One driver task drains the queue, so no two callbacks belonging to the
/// same instance ever run concurrently and the instance's state needs no
/// lock. Different instances own different strands and proceed fully in
/// parallel. An event posted after the driver has finished is dropped.
pub struct Strand<E> {
    tx: mpsc::UnboundedSender<E>,
}

pub struct StrandQueue<E> {
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E: Send + 'static> Strand<E> {
    pub fn new() -> (Self, StrandQueue<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, StrandQueue { rx })
    }

    /// Wraps a completion callback so it posts its payload to this strand
    /// instead of running in place.
    pub fn wrap<T>(&self, into_event: impl FnOnce(T) -> E + Send + 'static) -> impl FnOnce(T) + Send + 'static
    where
        T: Send + 'static,
    {
        let tx = self.tx.clone();
        move |value| {
            let _ = tx.send(into_event(value));
        }
    }
}

impl<E> StrandQueue<E> {
    pub async fn next(&mut self) -> Option<E> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Event {
        A(u32),
        B(u32),
    }

    #[tokio::test]
    async fn test_strand_serializes_foreign_thread_callbacks() {
        let (strand, mut queue) = Strand::new();

        let a = strand.wrap(Event::A);
        let b = strand.wrap(Event::B);
        std::thread::spawn(move || a(1));
        std::thread::spawn(move || b(2));

        let mut seen = vec![queue.next().await.unwrap(), queue.next().await.unwrap()];
        seen.sort_by_key(|e| match e {
            Event::A(_) => 0,
            Event::B(_) => 1,
        });
        assert_eq!(seen, vec![Event::A(1), Event::B(2)]);
    }

    #[tokio::test]
    async fn test_post_after_driver_finished_is_dropped() {
        let (strand, queue) = Strand::<Event>::new();
        drop(queue);

        // Must not panic even though nobody is listening anymore
        let post = strand.wrap(Event::A);
        post(7);
    }
}
