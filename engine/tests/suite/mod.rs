mod approval;
mod cancellation;
mod conversation;
