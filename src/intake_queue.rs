use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Lock-free multi-producer, single-consumer intake queue.
///
/// The queue is a Treiber stack: producers push onto a single atomic head
/// pointer with a compare-and-swap loop, and the one consumer takes the
/// whole stack at once by swapping the head with null. There is no pop of
/// individual nodes, so the classic ABA hazard of Treiber stacks does not
/// arise.
///
/// Because pushes are LIFO, a drained [`Chain`] comes out newest first.
/// [`Chain::into_fifo`] re-links it in place into submission order.
///
/// # Examples
///
/// ```
/// # use multi_stream_logger::intake_queue::IntakeQueue;
/// let queue = IntakeQueue::new();
/// assert!(queue.push(1));   // empty -> non-empty
/// assert!(!queue.push(2));
/// assert!(!queue.push(3));
///
/// let newest_first: Vec<_> = queue.drain().collect();
/// assert_eq!(newest_first, vec![3, 2, 1]);
///
/// queue.push(4);
/// queue.push(5);
/// let oldest_first: Vec<_> = queue.drain().into_fifo().collect();
/// assert_eq!(oldest_first, vec![4, 5]);
/// ```
pub struct IntakeQueue<T> {
    head: AtomicPtr<Node<T>>,
    _owns: PhantomData<Box<Node<T>>>,
}

struct Node<T> {
    value: T,
    next: *mut Node<T>,
}

// Values move between threads through the queue; the raw pointers are
// only dereferenced by whoever owns the node at that point.
unsafe impl<T: Send> Send for IntakeQueue<T> {}
unsafe impl<T: Send> Sync for IntakeQueue<T> {}

impl<T> IntakeQueue<T> {
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            _owns: PhantomData,
        }
    }

    /// Pushes `value` onto the queue.
    ///
    /// Safe to call from any number of threads at once. Never blocks; the
    /// CAS loop only retries when another producer won the race.
    ///
    /// # Returns
    ///
    /// `true` if the queue was empty before this push. The caller uses this
    /// to wake the consumer exactly once per empty to non-empty transition.
    pub fn push(&self, value: T) -> bool {
        let node = Box::into_raw(Box::new(Node { value, next: ptr::null_mut() }));
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // The node is not published yet, so we still own it exclusively.
            unsafe { (*node).next = head };
            match self.head.compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => return head.is_null(),
                Err(actual) => head = actual,
            }
        }
    }

    /// Takes every value pushed since the previous drain.
    ///
    /// Must only be called by the single consumer. The returned chain is in
    /// reverse submission order.
    pub fn drain(&self) -> Chain<T> {
        let head = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        Chain { head, _owns: PhantomData }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl<T> Default for IntakeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for IntakeQueue<T> {
    fn drop(&mut self) {
        drop(self.drain());
    }
}

/// An owned, singly linked run of values taken from an [`IntakeQueue`].
///
/// Iterating yields values from the current head onwards and frees each
/// node as it goes. Dropping the chain frees whatever is left.
pub struct Chain<T> {
    head: *mut Node<T>,
    _owns: PhantomData<Box<Node<T>>>,
}

unsafe impl<T: Send> Send for Chain<T> {}

impl<T> Chain<T> {
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Reverses the chain in place by flipping each node's link.
    ///
    /// A drained chain is newest first; after this call it is in the
    /// order the values were pushed. No allocation, O(n).
    pub fn into_fifo(mut self) -> Chain<T> {
        let mut prev: *mut Node<T> = ptr::null_mut();
        let mut cur = self.head;
        while !cur.is_null() {
            unsafe {
                let next = (*cur).next;
                (*cur).next = prev;
                prev = cur;
                cur = next;
            }
        }
        self.head = prev;
        self
    }
}

impl<T> Iterator for Chain<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.head.is_null() {
            return None;
        }
        // Every node in the chain came from Box::into_raw in push() and is
        // reachable from exactly one link.
        let node = unsafe { Box::from_raw(self.head) };
        self.head = node.next;
        Some(node.value)
    }
}

impl<T> Drop for Chain<T> {
    fn drop(&mut self) {
        for _ in self.by_ref() {}
    }
}
