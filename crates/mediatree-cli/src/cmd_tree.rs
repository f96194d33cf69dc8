use crate::ids::{RandomCommitIds, merge_request_id};
use crate::{Context, print_json};
use anyhow::Result;
use clap::Subcommand;
use mediatree::v1::{Command, MediaTypeTreeService};
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum TreeOp {
    /// Create a tree, optionally forked from another
    Create {
        /// Id of the new tree
        tree: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Tree to fork from
        #[arg(long)]
        base: Option<String>,
    },
    /// Add a media type to a tree
    Add {
        tree: String,

        /// Media type id
        id: String,

        /// Display name
        #[arg(long)]
        name: String,
    },
    /// Remove a media type; its children move up to its parents
    Remove { tree: String, id: String },
    /// Make PARENT a parent of CHILD
    AddParent {
        tree: String,
        child: String,
        parent: String,
    },
    /// Merge SOURCE into TARGET
    Merge {
        target: String,
        source: String,

        /// Merge request closed by this merge
        #[arg(long)]
        request: Option<String>,
    },
    /// Ask for SOURCE to be merged into TARGET
    RequestMerge {
        target: String,
        source: String,

        /// Merge request id (random if omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// Designate the main tree
    SetMain { tree: String },
}

impl TreeOp {
    fn into_command(self) -> Command {
        match self {
            TreeOp::Create { tree, name, base } => Command::CreateTree {
                tree_id: tree,
                name,
                base_tree_id: base,
            },
            TreeOp::Add { tree, id, name } => Command::AddMediaType {
                tree_id: tree,
                media_type_id: id,
                name,
            },
            TreeOp::Remove { tree, id } => Command::RemoveMediaType {
                tree_id: tree,
                media_type_id: id,
            },
            TreeOp::AddParent {
                tree,
                child,
                parent,
            } => Command::AddParentToMediaType {
                tree_id: tree,
                child_id: child,
                parent_id: parent,
            },
            TreeOp::Merge {
                target,
                source,
                request,
            } => Command::Merge {
                tree_id: target,
                source_tree_id: source,
                merge_request_id: request,
            },
            TreeOp::RequestMerge { target, source, id } => Command::RequestMerge {
                tree_id: target,
                merge_request_id: id.unwrap_or_else(merge_request_id),
                source_tree_id: source,
            },
            TreeOp::SetMain { tree } => Command::SetMainTree { tree_id: tree },
        }
    }
}

pub fn run(op: TreeOp, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let mut service = MediaTypeTreeService::new(store, Arc::new(RandomCommitIds));
    let stored = service.execute(&ctx.user, op.into_command())?;
    print_json(&stored, ctx.pretty)
}
