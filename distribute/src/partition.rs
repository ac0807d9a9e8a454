use std::ops::Range;

use crate::{context::WorkerContext, wire};

/// Tasks owned by one worker: a contiguous block and at most one extra task
/// taken from the remainder after the last full block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskAssignment {
    pub block: Range<usize>,
    pub extra: Option<usize>,
}

impl TaskAssignment {
    pub fn for_rank(total_tasks: usize, context: WorkerContext) -> Self {
        let per_worker = total_tasks / context.world_size;
        let first = context.rank * per_worker;

        Self {
            block: first..first + per_worker,
            extra: extra_task(total_tasks, context),
        }
    }

    /// Assignments of every rank, computed from the task and worker counts alone.
    pub fn partition(total_tasks: usize, world_size: usize) -> Vec<Self> {
        WorkerContext::world(world_size)
            .map(|context| Self::for_rank(total_tasks, context))
            .collect()
    }

    pub fn first(&self) -> Option<usize> {
        (!self.block.is_empty()).then_some(self.block.start)
    }

    pub fn last(&self) -> Option<usize> {
        (!self.block.is_empty()).then(|| self.block.end - 1)
    }

    pub fn block_len(&self) -> usize {
        self.block.len()
    }

    pub fn len(&self) -> usize {
        self.block_len() + usize::from(self.extra.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extra task as sent over the wire, `0` when there is none.
    pub fn wire_extra(&self) -> u64 {
        wire::encode_task_index(self.extra)
    }

    pub fn indices(&self) -> TaskIndices {
        TaskIndices {
            block: self.block.clone(),
            extra: self.extra,
        }
    }
}

/// Remainder task of `context.rank`, if any is left for it.
pub fn extra_task(total_tasks: usize, context: WorkerContext) -> Option<usize> {
    let per_worker = total_tasks / context.world_size;
    let full = per_worker * context.world_size;

    (context.rank < total_tasks - full).then_some(full + context.rank)
}

/// Indices of the block followed by the extra task.
#[derive(Clone, Debug)]
pub struct TaskIndices {
    block: Range<usize>,
    extra: Option<usize>,
}

impl Iterator for TaskIndices {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        self.block.next().or_else(|| self.extra.take())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.block.len() + usize::from(self.extra.is_some());

        (len, Some(len))
    }
}

impl ExactSizeIterator for TaskIndices {}

#[cfg(test)]
mod test {
    use crate::context::WorkerContext;

    use super::{TaskAssignment, extra_task};

    #[test]
    fn test_uneven_partition() {
        let assignments = TaskAssignment::partition(10, 3);

        let blocks: Vec<_> = assignments.iter().map(|a| a.block.clone()).collect();
        assert_eq!(blocks, vec![0..3, 3..6, 6..9]);

        let extras: Vec<_> = assignments.iter().map(|a| a.extra).collect();
        assert_eq!(extras, vec![Some(9), None, None]);

        assert_eq!(assignments[0].indices().collect::<Vec<_>>(), vec![0, 1, 2, 9]);
        assert_eq!(assignments[1].first(), Some(3));
        assert_eq!(assignments[1].last(), Some(5));
        assert_eq!(assignments[0].wire_extra(), 10);
        assert_eq!(assignments[2].wire_extra(), 0);
    }

    #[test]
    fn test_even_partition() {
        let assignments = TaskAssignment::partition(9, 3);

        for (rank, assignment) in assignments.iter().enumerate() {
            assert_eq!(assignment.block_len(), 3);
            assert_eq!(assignment.first(), Some(3 * rank));
            assert_eq!(assignment.extra, None);
        }
    }

    #[test]
    fn test_more_workers_than_tasks() {
        let assignments = TaskAssignment::partition(2, 4);

        for assignment in &assignments {
            assert_eq!(assignment.block_len(), 0);
            assert_eq!(assignment.first(), None);
            assert_eq!(assignment.last(), None);
        }
        let extras: Vec<_> = assignments.iter().map(|a| a.extra).collect();
        assert_eq!(extras, vec![Some(0), Some(1), None, None]);
        assert!(assignments[3].is_empty());
    }

    #[test]
    fn test_partition_covers_all_tasks() {
        for world_size in 1..9 {
            for total in 0..40 {
                let mut covered: Vec<usize> = TaskAssignment::partition(total, world_size)
                    .iter()
                    .flat_map(|a| a.indices())
                    .collect();

                let len = covered.len();
                covered.sort_unstable();
                covered.dedup();

                assert_eq!(len, total, "total {total}, world {world_size}");
                assert_eq!(covered, (0..total).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_indices_restart() {
        let context = WorkerContext::new(1, 3).unwrap();
        let assignment = TaskAssignment::for_rank(11, context);

        assert_eq!(extra_task(11, context), Some(10));
        let first: Vec<_> = assignment.indices().collect();
        let second: Vec<_> = assignment.indices().collect();

        assert_eq!(first, vec![3, 4, 5, 10]);
        assert_eq!(first, second);
        assert_eq!(assignment.indices().len(), 4);
    }
}
