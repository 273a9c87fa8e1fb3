mod helpers;
mod link;
