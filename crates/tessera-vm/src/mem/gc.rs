// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! Mark-sweep-compact collector and object resizing.
//!
//! Marking uses pointer reversal, so tracing needs no stack: while a chunk
//! is being scanned, its header temporarily holds a backpointer to its
//! parent and its forwarding word holds the parent's field index. Both are
//! restored before marking completes.
//!
//! A full collection runs in four steps:
//!
//! 1. mark every object reachable from the roots
//! 2. sweep: clear dead chunk headers to free; give each surviving chunk
//!    that will move its destination index in its forwarding word
//! 3. rewrite every root and every interior reference through the
//!    forwarding words
//! 4. slide survivors left and rebuild the trailing free chunk
//!
//! Strings, byte arrays, and code chunks are leaves: their payloads hold
//! no references and are never scanned. References into the code space are
//! roots of nothing; flash objects never move in RAM.
//!
//! [`ObjMem::resize`] reuses the forwarding machinery for a single object:
//! allocate a copy, forward the original, rewrite references, free the
//! original.

use super::{FIRST_CHUNK, ObjMem};
use crate::value::{Obj, ObjType, header, header_type, header_words};

/// The root set of a collection: every slot that may hold an object
/// reference. Globals, the live prefix of each task stack, and the scratch
/// slot all appear here; the chunk table holds code-space references only
/// and never participates.
pub struct Roots<'a, 'b> {
    /// Mutable views of every root slot group.
    pub slots: &'a mut [&'b mut [Obj]],
}

impl ObjMem {
    /// Run a full mark-sweep-compact collection.
    ///
    /// Every reference held in `roots` is rewritten in place when its
    /// target moves. References not reachable from `roots` are dangling
    /// after this returns.
    pub fn collect(&mut self, roots: &mut Roots<'_, '_>) {
        self.clear_forwarding();
        for group in roots.slots.iter_mut() {
            for slot in group.iter_mut() {
                self.mark(*slot);
            }
        }
        self.sweep();
        self.apply_forwarding();
        for group in roots.slots.iter_mut() {
            for slot in group.iter_mut() {
                *slot = self.forwarded(*slot);
            }
        }
        self.compact();
    }

    /// Grow or shrink an object, forwarding every reference to it.
    ///
    /// The returned reference replaces the original, which is freed; all
    /// interior and root references are rewritten. Returns `None` when the
    /// store cannot hold the copy (the original is left untouched).
    pub fn resize(&mut self, obj: Obj, new_words: u32, roots: &mut Roots<'_, '_>) -> Option<Obj> {
        debug_assert!(obj.is_heap_reference());
        let old_h = Self::index_of(obj);
        let obj_type = self.type_of(obj);
        let old_words = header_words(self.word(old_h));

        let new = self.alloc(obj_type, new_words, Obj::zero())?;
        let new_h = Self::index_of(new);
        let copy = old_words.min(new_words) as usize;
        for i in 0..copy {
            let w = self.word(old_h + 1 + i);
            self.set_word(new_h + 1 + i, w);
        }

        self.clear_forwarding();
        self.set_word(old_h - 1, new_h as u32);
        self.apply_forwarding();
        for group in roots.slots.iter_mut() {
            for slot in group.iter_mut() {
                *slot = self.forwarded(*slot);
            }
        }
        self.set_word(old_h - 1, 0);

        // the old chunk becomes free space, reclaimed by the next collection
        self.set_word(old_h, header(ObjType::Free, old_words));
        Some(new)
    }

    /// Zero every forwarding word.
    fn clear_forwarding(&mut self) {
        let capacity = self.capacity();
        let mut h = FIRST_CHUNK;
        while h < capacity {
            self.set_word(h - 1, 0);
            h += header_words(self.word(h)) as usize + 2;
        }
    }

    /// The forwarded version of a reference (identity for non-references
    /// and for objects that are not moving).
    fn forwarded(&self, obj: Obj) -> Obj {
        if !obj.is_heap_reference() {
            return obj;
        }
        let fwd = self.word(Self::index_of(obj) - 1);
        if fwd == 0 { obj } else { Self::ref_at(fwd as usize) }
    }

    #[inline]
    fn is_marked(&self, h: usize) -> bool {
        self.word(h - 1) != 0
    }

    /// Mark everything reachable from `root` using pointer reversal.
    fn mark(&mut self, root: Obj) {
        if !root.is_heap_reference() {
            return;
        }
        let root_h = Self::index_of(root);
        if self.is_marked(root_h) {
            return;
        }
        if self.is_leaf(root_h) {
            self.set_word(root_h - 1, 1);
            return;
        }

        let mut current = root_h;
        let mut i = header_words(self.word(current)) as usize;

        loop {
            if i == 0 {
                // done with this chunk's fields
                self.set_word(current - 1, 1);
                if current == root_h {
                    return;
                }
                // climb back to the parent, restoring both words
                let parent = (self.word(current) / 4) as usize;
                i = self.word(parent - 1) as usize;
                let child_header = self.word(parent + i);
                self.set_word(current, child_header);
                self.set_word(parent + i, Self::ref_at(current).raw());
                current = parent;
                i -= 1;
                continue;
            }

            let child = Obj::reference(self.word(current + i));
            if !child.is_heap_reference() {
                i -= 1;
                continue;
            }
            let child_h = Self::index_of(child);
            if self.is_marked(child_h) {
                i -= 1;
                continue;
            }
            if self.is_leaf(child_h) {
                self.set_word(child_h - 1, 1);
                i -= 1;
                continue;
            }

            // descend: reverse the pointers before processing the child
            let child_header = self.word(child_h);
            self.set_word(current + i, child_header);
            self.set_word(current - 1, i as u32);
            self.set_word(child_h, Self::ref_at(current).raw());
            current = child_h;
            i = header_words(child_header) as usize;
        }
    }

    /// True for chunks whose payload holds no references.
    fn is_leaf(&self, h: usize) -> bool {
        header_type(self.word(h)) <= ObjType::LAST_BINARY
    }

    /// Clear dead chunks to free space and assign destinations to movers.
    fn sweep(&mut self) {
        let capacity = self.capacity();
        let mut h = FIRST_CHUNK;
        let mut dst = FIRST_CHUNK;
        while h < capacity {
            let words = header_words(self.word(h)) as usize;
            if self.word(h - 1) != 0 {
                // survivor: forwarding holds the destination, or zero in place
                self.set_word(h - 1, if dst == h { 0 } else { dst as u32 });
                dst += words + 2;
            } else {
                self.set_word(h, header(ObjType::Free, words as u32));
            }
            h += words + 2;
        }
    }

    /// Rewrite interior references of live chunks through forwarding words.
    fn apply_forwarding(&mut self) {
        let capacity = self.capacity();
        let mut h = FIRST_CHUNK;
        while h < capacity {
            let word = self.word(h);
            let words = header_words(word) as usize;
            let tag = header_type(word);
            if tag != ObjType::Free as u8 && tag > ObjType::LAST_BINARY {
                for i in 1..=words {
                    let field = Obj::reference(self.word(h + i));
                    let moved = self.forwarded(field);
                    if moved != field {
                        self.set_word(h + i, moved.raw());
                    }
                }
            }
            h += words + 2;
        }
    }

    /// Slide survivors left and rebuild the trailing free chunk.
    fn compact(&mut self) {
        let capacity = self.capacity();
        let mut h = FIRST_CHUNK;
        let mut dst = FIRST_CHUNK;
        while h < capacity {
            let word = self.word(h);
            let words = header_words(word) as usize;
            if header_type(word) != ObjType::Free as u8 {
                if dst != h {
                    self.words_mut().copy_within(h..=h + words, dst);
                }
                self.set_word(dst - 1, 0);
                dst += words + 2;
            }
            h += words + 2;
        }

        let free_words = (capacity - 1 - dst) as u32;
        self.set_word(dst - 1, 0);
        self.set_word(dst, header(ObjType::Free, free_words));
        self.set_free_chunk(dst);
    }
}
