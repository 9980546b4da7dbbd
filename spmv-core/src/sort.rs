//! In-place sorting of short column-id rows.
//!
//! Rows of a mesh adjacency are short, so a shell sort is used below
//! [`SHELL_SORT_THRESHOLD`] entries and a heap sort above it.

pub(crate) const SHELL_SORT_THRESHOLD: usize = 20;

/// Sorts `a` in ascending order.
pub(crate) fn sort_local(a: &mut [usize]) {
    if a.len() < SHELL_SORT_THRESHOLD {
        shell_sort(a);
    } else {
        heap_sort(a);
    }
}

fn shell_sort(a: &mut [usize]) {
    let n = a.len();
    let mut inc = 1;
    while inc <= n / 9 {
        inc = 3 * inc + 1;
    }
    while inc > 0 {
        for i in inc..n {
            let v = a[i];
            let mut j = i;
            while j >= inc && a[j - inc] > v {
                a[j] = a[j - inc];
                j -= inc;
            }
            a[j] = v;
        }
        inc /= 3;
    }
}

/// Restores the max-heap property below `start`, considering `a[..end]`.
fn sift_down(a: &mut [usize], mut start: usize, end: usize) {
    loop {
        let mut child = 2 * start + 1;
        if child >= end {
            break;
        }
        if child + 1 < end && a[child + 1] > a[child] {
            child += 1;
        }
        if a[start] >= a[child] {
            break;
        }
        a.swap(start, child);
        start = child;
    }
}

fn heap_sort(a: &mut [usize]) {
    let n = a.len();
    for start in (0..n / 2).rev() {
        sift_down(a, start, n);
    }
    for end in (1..n).rev() {
        a.swap(0, end);
        sift_down(a, 0, end);
    }
}
