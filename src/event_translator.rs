/// Fills a claimed slot with user data before publication.
///
/// Translators are the only mechanism for getting data into a pre-allocated
/// slot through the publishing helpers of
/// [`RingBuffer`](crate::RingBuffer); the slot is borrowed mutably for the
/// duration of the call and published immediately after it returns (or
/// unwinds).
///
/// Any `Fn(&mut E, i64)` closure is a translator:
///
/// ```
/// use ringbus::{BusySpinWaitStrategy, RingBuffer};
///
/// struct Order {
///     quantity: u32,
/// }
///
/// let ring = RingBuffer::with_single_producer(|| Order { quantity: 0 }, 8, BusySpinWaitStrategy);
/// ring.publish_event(&|order: &mut Order, _sequence: i64| {
///     order.quantity = 250;
/// });
/// assert_eq!(ring.get(0).quantity, 250);
/// ```
pub trait EventTranslator<E> {
    /// Writes this translator's data into `event`, which occupies the slot
    /// claimed for `sequence`.
    fn translate_to(&self, event: &mut E, sequence: i64);
}

impl<E, F> EventTranslator<E> for F
where
    F: Fn(&mut E, i64),
{
    fn translate_to(&self, event: &mut E, sequence: i64) {
        self(event, sequence)
    }
}
