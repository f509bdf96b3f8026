//! Typestate for the ingestion pipeline, grounded on the teacher's own
//! `state_machines` usage: each stage function consumes the machine in its
//! `from` state and returns it in the `to` state, so a stage invoked out of
//! order is a compile error rather than a runtime one.

use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Categories,
    states: [Categories, ParsingImages, ParsingAnnotations, Thumbnails, Complete, Aborted],
    events {
        load_categories { transition: { from: Categories, to: ParsingImages } }
        parse_images { transition: { from: ParsingImages, to: ParsingAnnotations } }
        parse_annotations { transition: { from: ParsingAnnotations, to: Thumbnails } }
        backfill_thumbnails { transition: { from: Thumbnails, to: Complete } }
        abort {
            transition: { from: Categories, to: Aborted }
            transition: { from: ParsingImages, to: Aborted }
            transition: { from: ParsingAnnotations, to: Aborted }
            transition: { from: Thumbnails, to: Aborted }
        }
    }
}

pub fn start() -> IngestionMachine<(), Categories> {
    IngestionMachine::new(())
}
