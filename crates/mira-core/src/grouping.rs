//! Clustering of raw cascade hits into final detections.

use crate::types::BoundingBox;

/// Merge overlapping window hits.
///
/// Hits are partitioned into clusters of similar rectangles (corner
/// tolerance `eps` relative to the smaller box), each cluster is averaged,
/// clusters with `<= min_neighbors` members are dropped, and clusters that
/// sit inside a stronger cluster are suppressed. `min_neighbors == 0`
/// returns the hits unchanged.
pub fn group_rectangles(rects: Vec<BoundingBox>, min_neighbors: u32, eps: f64) -> Vec<BoundingBox> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects;
    }

    let (labels, classes) = partition(&rects, |a, b| similar(a, b, eps));

    let mut sums = vec![[0.0f64; 4]; classes];
    let mut counts = vec![0u32; classes];
    for (rect, &label) in rects.iter().zip(&labels) {
        let s = &mut sums[label];
        s[0] += rect.x as f64;
        s[1] += rect.y as f64;
        s[2] += rect.width as f64;
        s[3] += rect.height as f64;
        counts[label] += 1;
    }

    let averaged: Vec<BoundingBox> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &n)| {
            let n = n as f64;
            BoundingBox::new(
                (s[0] / n).round() as u32,
                (s[1] / n).round() as u32,
                (s[2] / n).round() as u32,
                (s[3] / n).round() as u32,
            )
        })
        .collect();

    let mut result = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }

        let nested = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            let (x1, y1, w1, h1) = (r1.x as i64, r1.y as i64, r1.width as i64, r1.height as i64);
            let (x2, y2, w2, h2) = (r2.x as i64, r2.y as i64, r2.width as i64, r2.height as i64);
            x1 >= x2 - dx
                && y1 >= y2 - dy
                && x1 + w1 <= x2 + w2 + dx
                && y1 + h1 <= y2 + h2 + dy
                && (n2 > n1.max(3) || n1 < 3)
        });

        if !nested {
            result.push(*r1);
        }
    }

    result
}

fn similar(a: &BoundingBox, b: &BoundingBox, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let (ax, ay, aw, ah) = (a.x as f64, a.y as f64, a.width as f64, a.height as f64);
    let (bx, by, bw, bh) = (b.x as f64, b.y as f64, b.width as f64, b.height as f64);
    (ax - bx).abs() <= delta
        && (ay - by).abs() <= delta
        && (ax + aw - bx - bw).abs() <= delta
        && (ay + ah - by - bh).abs() <= delta
}

/// Union-find partition. Returns a class label per item and the class
/// count; classes are numbered in order of first appearance.
fn partition<T>(items: &[T], mut same: impl FnMut(&T, &T) -> bool) -> (Vec<usize>, usize) {
    let mut parent: Vec<usize> = (0..items.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            if same(&items[i], &items[j]) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj.max(ri)] = ri.min(rj);
                }
            }
        }
    }

    let mut class_of_root = vec![usize::MAX; items.len()];
    let mut next = 0;
    let labels = (0..items.len())
        .map(|i| {
            let root = find(&mut parent, i);
            if class_of_root[root] == usize::MAX {
                class_of_root[root] = next;
                next += 1;
            }
            class_of_root[root]
        })
        .collect();

    (labels, next)
}
